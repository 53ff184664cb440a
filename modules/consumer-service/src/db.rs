use sqlx::postgres::{PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Initialize a connection pool to the PostgreSQL database
///
/// The consumer handles one message at a time, so a small pool suffices.
/// Sizing comes from `DB_MAX_CONNECTIONS` (default 10), `DB_MIN_CONNECTIONS`
/// (0) and `DB_ACQUIRE_TIMEOUT_SECS` (3).
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(env_or("DB_MAX_CONNECTIONS", 10u32))
        .min_connections(env_or("DB_MIN_CONNECTIONS", 0u32))
        .acquire_timeout(Duration::from_secs(env_or("DB_ACQUIRE_TIMEOUT_SECS", 3u64)))
        .connect(database_url)
        .await
}
