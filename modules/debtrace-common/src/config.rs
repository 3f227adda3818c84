use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Built once in each binary's `main` and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Store gateway
    pub store_base_url: String,

    // Message bus
    pub bus_project_id: String,
    pub bus_base_url: String,
    pub retrieval_topic_id: String,
    pub retrieval_subscription_id: String,
    pub cleaning_topic_id: String,
    pub message_batch_size: usize,
    pub publish_timeout_seconds: u64,
    pub retry_deadline_seconds: u64,
    pub max_workers: usize,

    // Stock metadata (Open FIGI)
    pub figi_api_key: String,
    pub figi_base_url: String,
    pub figi_max_jobs_per_request: usize,
    pub figi_max_requests_per_window: usize,
    pub figi_request_window_seconds: u64,

    // Reference datasets
    pub fred_api_key: String,
    pub fred_base_url: String,
    pub exchange_rates_url: String,

    // Data files
    pub config_dir: String,

    // HTTP services
    pub host: String,
    pub port: u16,
}

fn var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing environment variable {name}"))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .parse::<T>()
        .with_context(|| format!("environment variable {name} is not a valid value"))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            store_base_url: var("DATABASE_API_BASE_URL")?,
            bus_project_id: var("BUS_PROJECT_ID")?,
            bus_base_url: var_or("BUS_BASE_URL", "https://pubsub.googleapis.com"),
            retrieval_topic_id: var("DATA_RETRIEVAL_TOPIC_ID")?,
            retrieval_subscription_id: var("DATA_RETRIEVAL_SUBSCRIPTION_ID")?,
            cleaning_topic_id: var("DATA_CLEANING_TOPIC_ID")?,
            message_batch_size: parse_var("MESSAGE_BATCH_SIZE", "10")?,
            publish_timeout_seconds: parse_var("PUBLISH_TIMEOUT_SECONDS", "60")?,
            retry_deadline_seconds: parse_var("RETRY_DEADLINE_SECONDS", "600")?,
            max_workers: parse_var("MAX_WORKERS", "8")?,
            figi_api_key: var_or("OPEN_FIGI_API_KEY", ""),
            figi_base_url: var_or("OPEN_FIGI_API_BASE_URL", "https://api.openfigi.com"),
            figi_max_jobs_per_request: parse_var("OPEN_FIGI_MAX_JOBS_PER_REQUEST", "100")?,
            figi_max_requests_per_window: parse_var("OPEN_FIGI_MAX_REQUESTS_PER_WINDOW", "25")?,
            figi_request_window_seconds: parse_var("OPEN_FIGI_REQUEST_WINDOW_SECONDS", "6")?,
            fred_api_key: var_or("FRED_API_KEY", ""),
            fred_base_url: var_or("FRED_API_BASE_URL", "https://api.stlouisfed.org/fred"),
            exchange_rates_url: var_or(
                "EXCHANGE_RATES_URL",
                "https://stats.bis.org/api/v1/data/BIS,WS_XRU,1.0/all",
            ),
            config_dir: var_or("CONFIG_DIR", "config"),
            host: var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", "8080")?,
        };

        Ok(config)
    }
}
