//! NATS-based implementation of the EventBus trait

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// Header carrying the ordering key, since core NATS messages have none
pub const KEY_HEADER: &str = "message-key";

/// EventBus implementation using core NATS
///
/// This is the production implementation that connects to a NATS server.
/// It wraps an `async_nats::Client` and implements the `EventBus` trait.
///
/// NATS has no partitions or offsets. Delivered messages report partition 0
/// and an offset counting deliveries on the subscription, starting at 0.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.publish("user-events", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn to_nats_headers(message: &BusMessage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(key) = &message.key {
        headers.insert(KEY_HEADER, key.as_str());
    }
    if let Some(extra) = &message.headers {
        for (name, value) in extra {
            headers.insert(name.as_str(), value.as_str());
        }
    }
    headers
}

fn from_nats_message(nats_msg: async_nats::Message, offset: i64) -> BusMessage {
    let mut msg = BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec())
        .with_position(0, offset);

    if let Some(reply) = nats_msg.reply {
        msg = msg.with_reply_to(reply.to_string());
    }

    if let Some(nats_headers) = nats_msg.headers {
        let mut headers = HashMap::new();
        for (name, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        if let Some(key) = headers.remove(KEY_HEADER) {
            msg = msg.with_key(key);
        }
        if !headers.is_empty() {
            msg = msg.with_headers(headers);
        }
    }

    msg
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish_batch(&self, subject: &str, messages: Vec<BusMessage>) -> BusResult<()> {
        // Core NATS has no batch transaction; on error, earlier messages stay sent
        for message in messages {
            let headers = to_nats_headers(&message);
            self.client
                .publish_with_headers(subject.to_string(), headers, message.payload.into())
                .await
                .map_err(|e| BusError::PublishError(e.to_string()))?;
        }

        // The batch only counts as sent once the server has it
        self.flush().await
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber
            .enumerate()
            .map(|(offset, nats_msg)| from_nats_message(nats_msg, offset as i64));

        Ok(stream.boxed())
    }

    async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))
    }
}
