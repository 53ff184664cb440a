//! # EventBus Abstraction
//!
//! Shared messaging layer for the change-propagation services: the relay on
//! the system-of-record side publishes through it, the cache synchronizer on
//! the downstream side subscribes through it.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS
//! - **InMemoryBus**: Test/dev implementation using in-memory channels
//!
//! Both sit behind [`LazyBus`], which owns the connection state of a single
//! component and connects on first use.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{BusMessage, EventBus, InMemoryBus};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//!
//! let mut stream = bus.subscribe("user-events").await?;
//!
//! let msg = BusMessage::new("user-events".to_string(), b"{}".to_vec())
//!     .with_key("u1".to_string());
//! bus.publish_batch("user-events", vec![msg]).await?;
//!
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("offset {} key {:?}", msg.offset, msg.key);
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod lazy;
mod nats_bus;
pub mod retry;

pub use envelope::{
    ChangeAction, ChangeEvent, ChangeEventEnvelope, EntityRef, EnvelopeError, TenantContext,
    CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON, EVENT_TYPE_HEADER,
};
pub use inmemory_bus::InMemoryBus;
pub use lazy::{BusConnector, LazyBus, NatsConnector};
pub use nats_bus::{NatsBus, KEY_HEADER};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// A message travelling over the event bus
///
/// Outbound messages only set `key`, `payload` and `headers`; the transport
/// fills in `partition` and `offset` on delivery.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// Ordering key (the aggregate id for change events)
    pub key: Option<String>,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Message headers
    pub headers: Option<HashMap<String, String>>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
    /// Partition the message was delivered from
    pub partition: i32,
    /// Position of the message within its partition
    pub offset: i64,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            key: None,
            payload,
            headers: None,
            reply_to: None,
            partition: 0,
            offset: 0,
        }
    }

    /// Set the ordering key
    pub fn with_key(mut self, key: String) -> Self {
        self.key = Some(key);
        self
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a reply-to subject
    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Record where the transport delivered this message from
    pub fn with_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a single raw payload to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.publish_batch(subject, vec![BusMessage::new(subject.to_string(), payload)])
            .await
    }

    /// Publish a batch of messages to a subject as one send
    ///
    /// Messages are sent in order. The call succeeds only when every message
    /// has been handed to the transport. A failure fails the call, but the
    /// send is not atomic: messages ahead of the failing one may already have
    /// been delivered. Callers retry the whole batch, so consumers must
    /// tolerate duplicates.
    async fn publish_batch(&self, subject: &str, messages: Vec<BusMessage>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    ///
    /// Supports wildcards: `*` matches a single token, `>` one or more.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;

    /// Flush buffered outbound messages to the server
    async fn flush(&self) -> BusResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
