use anyhow::Context;
use event_bus::{BusConnector, InMemoryBus, LazyBus, NatsConnector};
use source_service_rs::config::{BusType, Config};
use source_service_rs::{
    db, BusEventPublisher, ChangePublisher, OutboxRelayWorker, PgOutboxStore, RelayConfig,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(bus_type = ?config.bus_type, topic = %config.outbox_topic, "Configuration loaded");

    let pool = db::init_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations completed");

    let connector: Arc<dyn BusConnector> = match config.bus_type {
        BusType::Nats => Arc::new(NatsConnector::new(config.nats_url.clone())),
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let publisher = Arc::new(BusEventPublisher::new(LazyBus::new(connector)));
    let worker = Arc::new(OutboxRelayWorker::new(
        Arc::new(PgOutboxStore::new(pool.clone())),
        publisher.clone(),
        RelayConfig {
            topic: config.outbox_topic.clone(),
            poll_interval: config.poll_interval,
            batch_size: config.batch_size,
        },
    ));

    worker.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    worker.stop().await;
    if let Err(e) = publisher.disconnect().await {
        tracing::warn!(error = %e, "Failed to disconnect publisher");
    }
    pool.close().await;

    Ok(())
}
