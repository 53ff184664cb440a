//! Outbox relay worker
//!
//! Polls the outbox on a fixed interval. Each poll claims a batch, publishes
//! it and commits the PUBLISHED status, or rolls the claim back when publishing
//! fails so the events are picked up again on the next poll.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::outbox::{OutboxError, OutboxStore};
use crate::publisher::{ChangePublisher, PublishError};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub topic: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: "user-events".to_string(),
            poll_interval: Duration::from_millis(500),
            batch_size: 50,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct OutboxRelayWorker {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn ChangePublisher>,
    config: RelayConfig,
    running: Mutex<Option<Running>>,
}

impl OutboxRelayWorker {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn ChangePublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            running: Mutex::new(None),
        }
    }

    /// Run one claim/publish/commit cycle, returning how many events were published
    pub async fn poll_once(&self) -> Result<usize, RelayError> {
        let batch = self.store.claim_pending(self.config.batch_size).await?;

        if batch.events().is_empty() {
            batch.commit_published().await?;
            return Ok(0);
        }

        let count = batch.events().len();
        match self.publisher.publish(&self.config.topic, batch.events()).await {
            Ok(()) => {
                batch.commit_published().await?;
                tracing::info!(topic = %self.config.topic, count, "Outbox batch published");
                Ok(count)
            }
            Err(e) => {
                if let Err(rollback_err) = batch.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back outbox claim");
                }
                Err(e.into())
            }
        }
    }

    /// Start polling in a background task. A no-op when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("Outbox relay worker already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(self);
        let span = tracing::info_span!("outbox_relay", topic = %self.config.topic);
        let task = tokio::spawn(worker.run(shutdown_rx).instrument(span));

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox relay worker started"
        );
        *running = Some(Running { shutdown, task });
    }

    /// Stop polling; an in-flight poll finishes before this returns
    pub async fn stop(&self) {
        let Some(Running { shutdown, task }) = self.running.lock().await.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Outbox relay task ended abnormally");
        }
        tracing::info!("Outbox relay worker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "Outbox poll failed, will retry next interval");
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}
