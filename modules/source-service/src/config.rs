use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: String,
    pub outbox_topic: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = BusType::from_env();

        let nats_url = env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let outbox_topic = env::var("OUTBOX_TOPIC")
            .unwrap_or_else(|_| "user-events".to_string());

        let poll_interval_ms: u64 = env::var("OUTBOX_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| "OUTBOX_POLL_INTERVAL_MS must be a valid u64".to_string())?;

        let batch_size: i64 = env::var("OUTBOX_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| "OUTBOX_BATCH_SIZE must be a valid integer".to_string())?;

        if batch_size < 1 {
            return Err("OUTBOX_BATCH_SIZE must be at least 1".to_string());
        }

        Ok(Config {
            database_url,
            bus_type,
            nats_url,
            outbox_topic,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
        })
    }
}
