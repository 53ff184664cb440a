use std::env;
use std::str::FromStr;
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
    pub sync_topic: String,
    pub dlq_topic: String,
    pub reference_service_url: String,
    pub consumer_id: String,
    pub reference_max_retries: u32,
    pub reference_base_delay: Duration,
    pub reference_timeout: Duration,
}

fn parsed<T: FromStr>(name: &str, default: &str) -> Result<T, String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("{name} must be a valid number"))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let nats_url = env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let sync_topic = env::var("SYNC_TOPIC")
            .unwrap_or_else(|_| "user-events".to_string());

        let dlq_topic = env::var("DLQ_TOPIC")
            .unwrap_or_else(|_| "user-events-dlq".to_string());

        let reference_service_url = env::var("REFERENCE_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8001".to_string());

        let consumer_id = env::var("CONSUMER_ID")
            .unwrap_or_else(|_| "consumer-service".to_string());

        let reference_max_retries: u32 = parsed("REFERENCE_MAX_RETRIES", "3")?;
        if reference_max_retries == 0 {
            return Err("REFERENCE_MAX_RETRIES must be at least 1".to_string());
        }

        let base_delay_ms: u64 = parsed("REFERENCE_BASE_DELAY_MS", "1000")?;
        let timeout_ms: u64 = parsed("REFERENCE_TIMEOUT_MS", "5000")?;

        Ok(Config {
            database_url,
            bus_type: BusType::from_env(),
            nats_url,
            sync_topic,
            dlq_topic,
            reference_service_url,
            consumer_id,
            reference_max_retries,
            reference_base_delay: Duration::from_millis(base_delay_ms),
            reference_timeout: Duration::from_millis(timeout_ms),
        })
    }
}
