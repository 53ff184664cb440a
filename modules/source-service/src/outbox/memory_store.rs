use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{ClaimedBatch, NewOutboxEvent, OutboxError, OutboxEvent, OutboxStatus, OutboxStore};

#[derive(Default)]
struct State {
    events: Vec<OutboxEvent>,
    locked: HashSet<Uuid>,
}

/// In-memory outbox for tests and local runs
///
/// Emulates `FOR UPDATE SKIP LOCKED`: claimed ids go into a locked set that
/// concurrent claims skip, and the set is released on commit, rollback or
/// drop of the batch.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a PENDING event, as a committed writer transaction would
    pub fn insert(&self, new: NewOutboxEvent) -> OutboxEvent {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            payload: new.payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            published_at: None,
        };
        lock(&self.state).events.push(event.clone());
        event
    }

    /// Every event in insertion order
    pub fn all(&self) -> Vec<OutboxEvent> {
        lock(&self.state).events.clone()
    }

    pub fn count_with_status(&self, status: OutboxStatus) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| e.status == status)
            .count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_pending(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut state = lock(&self.state);
        let limit = usize::try_from(limit).unwrap_or(0);

        let mut candidates: Vec<&OutboxEvent> = state
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && !state.locked.contains(&e.id))
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        candidates.sort_by_key(|e| e.created_at);

        let claimed: Vec<OutboxEvent> = candidates.into_iter().take(limit).cloned().collect();
        for event in &claimed {
            state.locked.insert(event.id);
        }

        Ok(Box::new(MemoryClaimedBatch {
            state: self.state.clone(),
            events: claimed,
            finished: false,
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        Ok(lock(&self.state).events.iter().find(|e| e.id == id).cloned())
    }
}

struct MemoryClaimedBatch {
    state: Arc<Mutex<State>>,
    events: Vec<OutboxEvent>,
    finished: bool,
}

impl MemoryClaimedBatch {
    fn release(&mut self, publish: bool) {
        let mut state = lock(&self.state);
        let now = Utc::now();

        for claimed in &self.events {
            state.locked.remove(&claimed.id);
            if publish {
                if let Some(event) = state
                    .events
                    .iter_mut()
                    .find(|e| e.id == claimed.id && e.status == OutboxStatus::Pending)
                {
                    event.status = OutboxStatus::Published;
                    event.published_at = Some(now);
                }
            }
        }
        self.finished = true;
    }
}

#[async_trait]
impl ClaimedBatch for MemoryClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn commit_published(self: Box<Self>) -> Result<(), OutboxError> {
        let mut batch = self;
        batch.release(true);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        let mut batch = self;
        batch.release(false);
        Ok(())
    }
}

impl Drop for MemoryClaimedBatch {
    fn drop(&mut self) {
        if !self.finished {
            self.release(false);
        }
    }
}
