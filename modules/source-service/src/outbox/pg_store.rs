use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::model::OutboxRow;
use super::{ClaimedBatch, NewOutboxEvent, OutboxError, OutboxEvent, OutboxStore};

/// Insert a PENDING outbox event inside the caller's transaction
///
/// The event becomes visible to the relay only when the caller commits, so it
/// is published if and only if the entity change itself is committed.
pub async fn insert_outbox_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewOutboxEvent,
) -> Result<Uuid, OutboxError> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, status)
        VALUES ($1, $2, $3, $4, $5, 'PENDING')
        "#,
    )
    .bind(id)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(event.event_type.as_str())
    .bind(&event.payload)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %id,
        aggregate_id = %event.aggregate_id,
        event_type = %event.event_type,
        "Event enqueued to outbox"
    );

    Ok(id)
}

/// Postgres outbox using `FOR UPDATE SKIP LOCKED` claims
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_pending(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, status,
                   created_at, published_at
            FROM outbox
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        // On a bad row `tx` is dropped here, which rolls the claim back
        let events = rows
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(PgClaimedBatch { tx, events }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, status,
                   created_at, published_at
            FROM outbox
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxEvent::try_from).transpose()
    }
}

struct PgClaimedBatch {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

#[async_trait]
impl ClaimedBatch for PgClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn commit_published(self: Box<Self>) -> Result<(), OutboxError> {
        let PgClaimedBatch { mut tx, events } = *self;

        if !events.is_empty() {
            let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
            sqlx::query(
                r#"
                UPDATE outbox
                SET status = 'PUBLISHED', published_at = NOW()
                WHERE id = ANY($1) AND status = 'PENDING'
                "#,
            )
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        let batch = *self;
        batch.tx.rollback().await?;
        Ok(())
    }
}
