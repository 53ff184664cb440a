//! Transactional outbox
//!
//! Change events are inserted in the same transaction as the entity change
//! and later claimed by the relay worker. A claim is a [`ClaimedBatch`]:
//! the claimed rows stay locked until the batch is committed as published or
//! rolled back. Dropping a batch without finishing it rolls it back.

mod memory_store;
mod model;
mod pg_store;

pub use memory_store::InMemoryOutboxStore;
pub use model::{NewOutboxEvent, OutboxEvent, OutboxStatus, USER_AGGREGATE};
pub use pg_store::{insert_outbox_event, PgOutboxStore};

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid outbox row: {0}")]
    InvalidRow(String),
}

/// Storage for pending change events
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` PENDING events, oldest first
    ///
    /// Rows already claimed by another open batch are skipped, never waited on.
    async fn claim_pending(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError>;
}

/// Events claimed by one relay poll, held until committed or rolled back
#[async_trait]
pub trait ClaimedBatch: Send {
    fn events(&self) -> &[OutboxEvent];

    /// Mark every claimed event PUBLISHED and release the claim
    async fn commit_published(self: Box<Self>) -> Result<(), OutboxError>;

    /// Release the claim, leaving every event PENDING
    async fn rollback(self: Box<Self>) -> Result<(), OutboxError>;
}
