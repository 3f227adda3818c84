use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debtrace_bus::{PubSubPublisher, PubSubSubscriber};
use debtrace_common::AppConfig;
use debtrace_fetch::Fetcher;
use debtrace_store::StoreClient;
use debtrace_workflows::{EngineDeps, WorkflowRegistry};

mod dispatcher;

use dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debtrace_dispatch=info,debtrace_workflows=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("debtrace-dispatch starting");

    let fetcher = Fetcher::from_agent_pool_file(&format!(
        "{}/user_agent_headers.json",
        config.config_dir
    ))
    .context("failed to load user agent pool")?;

    let store = Arc::new(StoreClient::new(&config.store_base_url));
    let auth_token = std::env::var("BUS_AUTH_TOKEN").ok();

    let tasks_publisher = PubSubPublisher::new(
        &config.bus_base_url,
        &config.bus_project_id,
        &config.retrieval_topic_id,
        auth_token.clone(),
        Duration::from_secs(config.publish_timeout_seconds),
    );
    let cleaning_publisher = PubSubPublisher::new(
        &config.bus_base_url,
        &config.bus_project_id,
        &config.cleaning_topic_id,
        auth_token.clone(),
        Duration::from_secs(config.publish_timeout_seconds),
    );
    let subscriber = PubSubSubscriber::new(
        &config.bus_base_url,
        &config.bus_project_id,
        &config.retrieval_subscription_id,
        auth_token,
        config.message_batch_size,
        Duration::from_secs(config.retry_deadline_seconds),
    );

    let deps = EngineDeps {
        fetcher: Arc::new(fetcher),
        store: store.clone(),
        publisher: Arc::new(tasks_publisher),
        config_dir: config.config_dir.clone(),
    };

    let mut dispatcher = Dispatcher::new(
        Arc::new(subscriber),
        Arc::new(cleaning_publisher),
        Arc::new(WorkflowRegistry::standard()),
        deps,
        config.max_workers,
    );
    dispatcher.run().await
}
