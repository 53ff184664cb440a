//! Dead Letter Queue publishing
//!
//! Messages the consumer cannot process are republished, with failure
//! metadata, to a parallel subject instead of blocking the subscription.

use chrono::{DateTime, Utc};
use event_bus::{BusMessage, LazyBus};
use serde::Serialize;
use std::collections::HashMap;

pub const ORIGINAL_TOPIC_HEADER: &str = "x-original-topic";
pub const ERROR_TYPE_HEADER: &str = "x-error-type";
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Why a message was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl FailureInfo {
    /// Capture an error, keeping its source chain as the stack
    pub fn from_error(name: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        Self {
            name: name.to_string(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub partition: i32,
    pub offset: i64,
    /// The original payload; JSON when it parses, otherwise a string
    pub message: serde_json::Value,
    pub error: FailureInfo,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl DeadLetterRecord {
    pub fn new(
        topic: &str,
        partition: i32,
        offset: i64,
        raw_message: &[u8],
        error: FailureInfo,
        retry_count: u32,
    ) -> Self {
        let message = serde_json::from_slice(raw_message).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(raw_message).into_owned())
        });

        Self {
            original_topic: topic.to_string(),
            partition,
            offset,
            message,
            error,
            timestamp: Utc::now(),
            retry_count,
        }
    }

    /// Key identifying the original message: `{topic}-{partition}-{offset}`
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.original_topic, self.partition, self.offset)
    }
}

pub struct DeadLetterPublisher {
    bus: LazyBus,
    dlq_topic: String,
}

impl DeadLetterPublisher {
    pub fn new(bus: LazyBus, dlq_topic: impl Into<String>) -> Self {
        Self {
            bus,
            dlq_topic: dlq_topic.into(),
        }
    }

    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    /// Publish a dead letter. Failures are logged, never returned.
    pub async fn send_to_dlq(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        raw_message: &[u8],
        error: FailureInfo,
        retry_count: u32,
    ) {
        let record = DeadLetterRecord::new(topic, partition, offset, raw_message, error, retry_count);
        let key = record.key();

        if let Err(e) = self.publish(&record, &key).await {
            tracing::error!(
                dlq_topic = %self.dlq_topic,
                original_topic = %topic,
                partition,
                offset,
                error = %e,
                "Failed to publish dead letter - message may be lost!"
            );
            return;
        }

        tracing::warn!(
            dlq_topic = %self.dlq_topic,
            original_topic = %topic,
            partition,
            offset,
            error_type = %record.error.name,
            "Message moved to DLQ"
        );
    }

    async fn publish(
        &self,
        record: &DeadLetterRecord,
        key: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_vec(record)?;

        let mut headers = HashMap::new();
        headers.insert(ORIGINAL_TOPIC_HEADER.to_string(), record.original_topic.clone());
        headers.insert(ERROR_TYPE_HEADER.to_string(), record.error.name.clone());
        headers.insert(RETRY_COUNT_HEADER.to_string(), record.retry_count.to_string());

        let message = BusMessage::new(self.dlq_topic.clone(), payload)
            .with_key(key.to_string())
            .with_headers(headers);

        let bus = self.bus.get().await?;
        bus.publish_batch(&self.dlq_topic, vec![message]).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.bus.disconnect().await {
            tracing::warn!(error = %e, "Failed to disconnect DLQ publisher");
        }
    }
}
