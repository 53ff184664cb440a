use chrono::Utc;
use event_bus::{ChangeAction, ChangeEvent};
use std::sync::Arc;

use crate::cache::{CacheError, UserCacheRecord, UserCacheRepository};
use crate::reference_client::{FetchError, FetchFailure, ReferenceDataClient};

pub const USER_ENTITY: &str = "USER";

/// What a sync run did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Not a user event
    Ignored,
    Deleted,
    Upserted,
    /// The cache already held data at least as new
    Stale,
    /// The source no longer has the user
    SourceMissing,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchFailure),

    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),
}

impl SyncError {
    /// Error name recorded on dead letters
    pub fn name(&self) -> &'static str {
        match self {
            SyncError::Fetch(e) => e.error.name(),
            SyncError::Cache(_) => "CacheError",
        }
    }

    /// Reference fetch attempts made before giving up; 0 for cache errors
    pub fn retry_count(&self) -> u32 {
        match self {
            SyncError::Fetch(e) => e.attempts,
            SyncError::Cache(_) => 0,
        }
    }
}

/// Applies one change event to the local cache
///
/// The event only signals that something changed. The user's data always
/// comes from the reference service, never from the event.
pub struct SyncUserUseCase {
    reference: Arc<ReferenceDataClient>,
    cache: Arc<dyn UserCacheRepository>,
}

impl SyncUserUseCase {
    pub fn new(reference: Arc<ReferenceDataClient>, cache: Arc<dyn UserCacheRepository>) -> Self {
        Self { reference, cache }
    }

    pub async fn execute(&self, event: &ChangeEvent) -> Result<SyncOutcome, SyncError> {
        if event.entity.entity_type != USER_ENTITY {
            tracing::info!(
                event_id = %event.event_id,
                entity_type = %event.entity.entity_type,
                "Ignoring non-user event"
            );
            return Ok(SyncOutcome::Ignored);
        }

        let user_id = &event.entity.id;

        if event.action == ChangeAction::Delete {
            let existed = self.cache.delete(user_id).await?;
            tracing::info!(user_id = %user_id, existed, "User removed from cache");
            return Ok(SyncOutcome::Deleted);
        }

        let user = match self.reference.fetch_user(user_id, &event.org_id).await {
            Ok(Some(user)) => user,
            Ok(None)
            | Err(FetchFailure {
                error: FetchError::NotFound,
                ..
            }) => {
                tracing::warn!(user_id = %user_id, org_id = %event.org_id, "User not found at source, skipping");
                return Ok(SyncOutcome::SourceMissing);
            }
            Err(e) => return Err(e.into()),
        };

        let record = UserCacheRecord {
            id: user.id,
            org_id: user.org_id,
            email: user.email,
            name: user.name,
            phone: user.phone,
            synced_at: Utc::now(),
            source_updated_at: user.updated_at,
        };

        if self.cache.upsert(&record).await? {
            tracing::info!(user_id = %record.id, action = %event.action, "User synced");
            Ok(SyncOutcome::Upserted)
        } else {
            tracing::debug!(user_id = %record.id, "Cached user already up to date");
            Ok(SyncOutcome::Stale)
        }
    }
}
