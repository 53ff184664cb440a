//! Local user cache
//!
//! Written only by the synchronizer. An upsert overwrites a stored record only
//! when the incoming `source_updated_at` is strictly newer; deletes are
//! unconditional.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserCacheRecord {
    pub id: String,
    pub org_id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub synced_at: DateTime<Utc>,
    pub source_updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait UserCacheRepository: Send + Sync {
    /// Insert or overwrite; returns `false` when the stored copy is as new or newer
    async fn upsert(&self, record: &UserCacheRecord) -> Result<bool, CacheError>;

    /// Remove by id; returns whether a record existed
    async fn delete(&self, id: &str) -> Result<bool, CacheError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<UserCacheRecord>, CacheError>;

    /// Every record, most recently synced first
    async fn find_all(&self) -> Result<Vec<UserCacheRecord>, CacheError>;
}

#[derive(Clone)]
pub struct PgUserCacheRepository {
    pool: PgPool,
}

impl PgUserCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserCacheRepository for PgUserCacheRepository {
    async fn upsert(&self, record: &UserCacheRecord) -> Result<bool, CacheError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users_cache (id, org_id, email, name, phone, synced_at, source_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email,
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                synced_at = EXCLUDED.synced_at,
                source_updated_at = EXCLUDED.source_updated_at
            WHERE users_cache.source_updated_at < EXCLUDED.source_updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.org_id)
        .bind(&record.email)
        .bind(&record.name)
        .bind(&record.phone)
        .bind(record.synced_at)
        .bind(record.source_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM users_cache WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserCacheRecord>, CacheError> {
        let record = sqlx::query_as::<_, UserCacheRecord>(
            r#"
            SELECT id, org_id, email, name, phone, synced_at, source_updated_at
            FROM users_cache
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_all(&self) -> Result<Vec<UserCacheRecord>, CacheError> {
        let records = sqlx::query_as::<_, UserCacheRecord>(
            r#"
            SELECT id, org_id, email, name, phone, synced_at, source_updated_at
            FROM users_cache
            ORDER BY synced_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// In-memory cache for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryUserCacheRepository {
    records: Arc<Mutex<HashMap<String, UserCacheRecord>>>,
}

impl InMemoryUserCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, UserCacheRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl UserCacheRepository for InMemoryUserCacheRepository {
    async fn upsert(&self, record: &UserCacheRecord) -> Result<bool, CacheError> {
        let mut records = self.records();
        match records.get_mut(&record.id) {
            Some(existing) if existing.source_updated_at >= record.source_updated_at => Ok(false),
            Some(existing) => {
                // org_id stays as first written
                existing.email = record.email.clone();
                existing.name = record.name.clone();
                existing.phone = record.phone.clone();
                existing.synced_at = record.synced_at;
                existing.source_updated_at = record.source_updated_at;
                Ok(true)
            }
            None => {
                records.insert(record.id.clone(), record.clone());
                Ok(true)
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, CacheError> {
        Ok(self.records().remove(id).is_some())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserCacheRecord>, CacheError> {
        Ok(self.records().get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<UserCacheRecord>, CacheError> {
        let mut all: Vec<UserCacheRecord> = self.records().values().cloned().collect();
        all.sort_by(|a, b| b.synced_at.cmp(&a.synced_at));
        Ok(all)
    }
}
