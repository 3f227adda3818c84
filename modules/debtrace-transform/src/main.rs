use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debtrace_common::AppConfig;
use debtrace_store::StoreClient;
use debtrace_transform::currency::load_code_column;
use debtrace_transform::standardize::load_country_codes;
use debtrace_transform::{
    decode_push_envelope, CurrencyEngine, InvestmentTransform, NameStandardizer, ProjectTransform,
    StocksClient, TransformJobHandler,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debtrace_transform=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("debtrace-transform starting");

    let store = Arc::new(StoreClient::new(&config.store_base_url));
    let standardizer = NameStandardizer::from_config_dir(&config.config_dir)?;
    let country_codes = load_country_codes(&config.config_dir)?;

    // Reference tables load once at cold start.
    let known_countries = load_code_column(
        &format!("{}/country_codes.csv", config.config_dir),
        "alpha2",
    )?;
    let known_currencies = load_code_column(
        &format!("{}/currency_codes.csv", config.config_dir),
        "currency",
    )?;
    let reference_client = reqwest::Client::new();
    let currency = CurrencyEngine::load(
        &reference_client,
        &config.exchange_rates_url,
        &config.fred_base_url,
        &config.fred_api_key,
        &known_countries,
        &known_currencies,
    )
    .await
    .context("failed to load currency reference data")?;

    let stocks = StocksClient::new(
        &config.figi_base_url,
        &config.figi_api_key,
        config.figi_max_jobs_per_request,
        config.figi_max_requests_per_window,
        Duration::from_secs(config.figi_request_window_seconds),
    );

    let projects = ProjectTransform::new(store.clone(), standardizer, currency, country_codes);
    let investments = InvestmentTransform::new(store.clone(), Arc::new(stocks));
    let handler = Arc::new(TransformJobHandler::new(store, projects, investments));

    let app = Router::new()
        .route("/", post(process_push))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(handler);

    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(%address, "Listening for cleaning-stage messages");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Receives one push envelope per completed job and runs its cleanup.
async fn process_push(
    State(handler): State<Arc<TransformJobHandler>>,
    Json(envelope): Json<serde_json::Value>,
) -> (StatusCode, String) {
    let job_id = match decode_push_envelope(&envelope) {
        Ok(job_id) => job_id,
        Err(e) => {
            let message = format!("Failed to parse incoming message. {e}.");
            tracing::error!(error = %message, "Rejected push envelope");
            return (StatusCode::BAD_REQUEST, message);
        }
    };

    match handler.handle(job_id).await {
        Ok(message) => (StatusCode::CREATED, message),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
