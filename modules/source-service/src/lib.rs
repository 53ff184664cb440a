pub mod config;
pub mod db;
pub mod outbox;
pub mod publisher;
pub mod relay;
pub mod users;

pub use outbox::{InMemoryOutboxStore, OutboxStore, PgOutboxStore};
pub use publisher::{BusEventPublisher, ChangePublisher};
pub use relay::{OutboxRelayWorker, RelayConfig};
