use async_trait::async_trait;
use event_bus::{
    BusError, BusMessage, ChangeEventEnvelope, EntityRef, EnvelopeError, LazyBus, TenantContext,
    CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON, EVENT_TYPE_HEADER,
};
use std::collections::HashMap;

use crate::outbox::OutboxEvent;

/// Value of `source_system` in every envelope this service publishes
pub const SOURCE_SYSTEM: &str = "SOURCE_SERVICE";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Sends claimed outbox events to the bus
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    /// Send the whole batch; an error means none of it may be treated as sent
    async fn publish(&self, topic: &str, events: &[OutboxEvent]) -> Result<(), PublishError>;

    /// Release the bus connection. Safe to call when not connected.
    async fn disconnect(&self) -> Result<(), PublishError>;
}

/// Build the bus message for one outbox event
///
/// Key is the aggregate id so all changes to one entity share a key.
pub fn build_message(event: &OutboxEvent) -> Result<BusMessage, PublishError> {
    let envelope = ChangeEventEnvelope {
        event_id: event.id,
        entity: EntityRef {
            entity_type: event.aggregate_type.clone(),
            id: event.aggregate_id.clone(),
        },
        action: event.event_type,
        timestamp: event.created_at,
        source_system: SOURCE_SYSTEM.to_string(),
        tenant_context: TenantContext {
            org_id: event.org_id().map(str::to_string),
        },
    };

    let mut headers = HashMap::new();
    headers.insert(CONTENT_TYPE_HEADER.to_string(), CONTENT_TYPE_JSON.to_string());
    headers.insert(EVENT_TYPE_HEADER.to_string(), event.event_type.to_string());

    Ok(BusMessage::new(String::new(), envelope.to_vec()?)
        .with_key(event.aggregate_id.clone())
        .with_headers(headers))
}

/// [`ChangePublisher`] over a lazily connected [`LazyBus`]
pub struct BusEventPublisher {
    bus: LazyBus,
}

impl BusEventPublisher {
    pub fn new(bus: LazyBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ChangePublisher for BusEventPublisher {
    async fn publish(&self, topic: &str, events: &[OutboxEvent]) -> Result<(), PublishError> {
        if events.is_empty() {
            return Ok(());
        }

        let messages = events
            .iter()
            .map(build_message)
            .collect::<Result<Vec<_>, _>>()?;

        let bus = self.bus.get().await?;
        bus.publish_batch(topic, messages).await?;

        tracing::debug!(topic = %topic, count = events.len(), "Published outbox batch");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        self.bus.disconnect().await?;
        Ok(())
    }
}
