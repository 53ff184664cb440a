use anyhow::Context;
use consumer_service_rs::config::{BusType, Config};
use consumer_service_rs::{
    db, DeadLetterPublisher, HttpReferenceTransport, PgUserCacheRepository, ReferenceDataClient,
    SyncUserUseCase, UserEventConsumer,
};
use event_bus::retry::RetryConfig;
use event_bus::{BusConnector, InMemoryBus, LazyBus, NatsConnector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(
        bus_type = ?config.bus_type,
        topic = %config.sync_topic,
        dlq_topic = %config.dlq_topic,
        "Configuration loaded"
    );

    let pool = db::init_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations completed");

    let transport =
        HttpReferenceTransport::new(&config.reference_service_url, config.reference_timeout)
            .context("Failed to build reference service client")?;
    let reference = Arc::new(ReferenceDataClient::new(
        Arc::new(transport),
        config.consumer_id.clone(),
        RetryConfig {
            max_attempts: config.reference_max_retries,
            base_delay: config.reference_base_delay,
            ..RetryConfig::default()
        },
    ));
    let sync = Arc::new(SyncUserUseCase::new(
        reference,
        Arc::new(PgUserCacheRepository::new(pool.clone())),
    ));

    let connector: Arc<dyn BusConnector> = match config.bus_type {
        BusType::Nats => Arc::new(NatsConnector::new(config.nats_url.clone())),
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let dlq = Arc::new(DeadLetterPublisher::new(
        LazyBus::new(connector.clone()),
        config.dlq_topic.clone(),
    ));
    let consumer = Arc::new(UserEventConsumer::new(LazyBus::new(connector), sync, dlq));

    consumer
        .start(&config.sync_topic)
        .await
        .context("Failed to start user event consumer")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    consumer.stop().await;
    pool.close().await;

    Ok(())
}
