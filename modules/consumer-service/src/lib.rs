pub mod cache;
pub mod config;
pub mod consumer;
pub mod db;
pub mod dlq;
pub mod reference_client;
pub mod sync;

pub use cache::{
    InMemoryUserCacheRepository, PgUserCacheRepository, UserCacheRecord, UserCacheRepository,
};
pub use consumer::{ConsumerState, MessageOutcome, UserEventConsumer};
pub use dlq::DeadLetterPublisher;
pub use reference_client::{HttpReferenceTransport, ReferenceDataClient, ReferenceTransport};
pub use sync::{SyncOutcome, SyncUserUseCase};
