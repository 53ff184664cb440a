//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated message buses
///
/// Messages are broadcast to all subscribers via a Tokio broadcast channel.
/// The bus models a single partition: every published message gets the next
/// offset, so subscribers observe one total order. A bus built with
/// [`with_history`] also keeps every published message for tests to inspect
/// with [`published`]; the default bus keeps nothing.
///
/// [`with_history`]: InMemoryBus::with_history
/// [`published`]: InMemoryBus::published
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Subscribe before publishing
/// let mut stream = bus.subscribe("test.events.>").await?;
///
/// // Publish a message
/// bus.publish("test.events.created", b"hello".to_vec()).await?;
///
/// // Receive it
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "test.events.created");
/// assert_eq!(msg.payload, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    state: Arc<Mutex<LogState>>,
}

struct LogState {
    next_offset: i64,
    history: Option<Vec<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus
    ///
    /// The bus uses a broadcast channel with a buffer of 1000 messages.
    /// If this buffer is exceeded, lagging subscribers skip the oldest ones.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new in-memory event bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            state: Arc::new(Mutex::new(LogState {
                next_offset: 0,
                history: None,
            })),
        }
    }

    /// Create a bus that records every published message
    ///
    /// The history is never trimmed, so this is for tests only.
    pub fn with_history() -> Self {
        let bus = Self::new();
        bus.lock_state().history = Some(Vec::new());
        bus
    }

    /// All messages published so far on subjects matching `pattern`
    ///
    /// Always empty unless the bus was built with [`InMemoryBus::with_history`].
    pub fn published(&self, pattern: &str) -> Vec<BusMessage> {
        self.lock_state()
            .history
            .iter()
            .flatten()
            .filter(|msg| Self::matches_pattern(&msg.subject, pattern))
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish_batch(&self, subject: &str, messages: Vec<BusMessage>) -> BusResult<()> {
        // Holding the lock for the whole batch keeps batch offsets contiguous
        let mut state = self.lock_state();

        for message in messages {
            let mut msg = message.with_position(0, state.next_offset);
            msg.subject = subject.to_string();
            state.next_offset += 1;

            if let Some(history) = state.history.as_mut() {
                history.push(msg.clone());
            }
            // No receivers is fine
            let _ = self.sender.send(msg);
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
