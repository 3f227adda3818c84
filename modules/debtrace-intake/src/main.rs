use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debtrace_bus::PubSubPublisher;
use debtrace_common::AppConfig;
use debtrace_store::StoreClient;

mod app;

use app::{router, IntakeState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debtrace_intake=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("debtrace-intake starting");

    let publisher = PubSubPublisher::new(
        &config.bus_base_url,
        &config.bus_project_id,
        &config.retrieval_topic_id,
        std::env::var("BUS_AUTH_TOKEN").ok(),
        Duration::from_secs(config.publish_timeout_seconds),
    );
    let state = Arc::new(IntakeState {
        store: Arc::new(StoreClient::new(&config.store_base_url)),
        publisher: Arc::new(publisher),
    });

    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(%address, "Listening for scheduler triggers");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
