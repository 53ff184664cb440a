//! User change-event consumer
//!
//! Reads the change subject in order and hands each validated event to the
//! synchronizer. Nothing that goes wrong with a single message stops the
//! subscription: malformed envelopes and sync failures are dead-lettered.

use event_bus::{BusError, BusMessage, ChangeEventEnvelope, LazyBus};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::dlq::{DeadLetterPublisher, FailureInfo};
use crate::sync::{SyncOutcome, SyncUserUseCase};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Running,
}

/// How a single message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Empty payload
    Skipped,
    Synced(SyncOutcome),
    DeadLettered,
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct UserEventConsumer {
    bus: LazyBus,
    sync: Arc<SyncUserUseCase>,
    dlq: Arc<DeadLetterPublisher>,
    running: Mutex<Option<Running>>,
}

impl UserEventConsumer {
    pub fn new(bus: LazyBus, sync: Arc<SyncUserUseCase>, dlq: Arc<DeadLetterPublisher>) -> Self {
        Self {
            bus,
            sync,
            dlq,
            running: Mutex::new(None),
        }
    }

    /// A task whose subscription has ended counts as stopped
    pub async fn state(&self) -> ConsumerState {
        match &*self.running.lock().await {
            Some(running) if !running.task.is_finished() => ConsumerState::Running,
            _ => ConsumerState::Stopped,
        }
    }

    /// Subscribe to `topic` and process messages in a background task
    ///
    /// The subscription is live when this returns. Calling it while running
    /// is a no-op. If the previous subscription ended on its own, a fresh one
    /// is opened.
    pub async fn start(self: &Arc<Self>, topic: &str) -> Result<(), ConsumerError> {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(current) if !current.task.is_finished() => {
                tracing::warn!(topic = %topic, "User event consumer already running");
                *running = Some(current);
                return Ok(());
            }
            Some(ended) => {
                if let Err(e) = ended.task.await {
                    tracing::error!(error = %e, "User event consumer task ended abnormally");
                }
                tracing::info!(topic = %topic, "Previous subscription ended, resubscribing");
            }
            None => {}
        }

        let mut stream = self.bus.get().await?.subscribe(topic).await?;
        tracing::info!(topic = %topic, "Subscribed to user events");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let consumer = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    next = stream.next() => match next {
                        Some(msg) => {
                            let span = tracing::info_span!(
                                "process_event",
                                subject = %msg.subject,
                                partition = msg.partition,
                                offset = msg.offset
                            );
                            consumer.handle_message(&msg).instrument(span).await;
                        }
                        None => {
                            tracing::warn!("User event stream ended, consumer stopped");
                            break;
                        }
                    },
                }
            }
        });

        *running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Process one message; never fails
    pub async fn handle_message(&self, msg: &BusMessage) -> MessageOutcome {
        if msg.payload.is_empty() {
            tracing::warn!("Empty message payload, skipping");
            return MessageOutcome::Skipped;
        }

        let event = match ChangeEventEnvelope::from_slice(&msg.payload).and_then(|e| e.validate()) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Invalid change envelope, sending to DLQ");
                self.dlq
                    .send_to_dlq(
                        &msg.subject,
                        msg.partition,
                        msg.offset,
                        &msg.payload,
                        FailureInfo::from_error(e.kind(), &e),
                        0,
                    )
                    .await;
                return MessageOutcome::DeadLettered;
            }
        };

        match self.sync.execute(&event).await {
            Ok(outcome) => {
                tracing::debug!(event_id = %event.event_id, outcome = ?outcome, "Event processed");
                MessageOutcome::Synced(outcome)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "Sync failed, sending to DLQ"
                );
                self.dlq
                    .send_to_dlq(
                        &msg.subject,
                        msg.partition,
                        msg.offset,
                        &msg.payload,
                        FailureInfo::from_error(e.name(), &e),
                        e.retry_count(),
                    )
                    .await;
                MessageOutcome::DeadLettered
            }
        }
    }

    /// End the subscription and release both bus connections
    ///
    /// A message being processed finishes first.
    pub async fn stop(&self) {
        if let Some(Running { shutdown, task }) = self.running.lock().await.take() {
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                tracing::error!(error = %e, "User event consumer task ended abnormally");
            }
        }

        if let Err(e) = self.bus.disconnect().await {
            tracing::warn!(error = %e, "Failed to disconnect consumer bus");
        }
        self.dlq.disconnect().await;
        tracing::info!("User event consumer stopped");
    }
}
