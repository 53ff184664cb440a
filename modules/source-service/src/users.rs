//! User writes for the system of record
//!
//! Every mutation commits the user change and its outbox event in one
//! transaction, so a change is published exactly when it is committed.

use chrono::{DateTime, Utc};
use event_bus::ChangeAction;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::outbox::{insert_outbox_event, NewOutboxEvent, OutboxError};

const UNIQUE_VIOLATION: &str = "23505";

/// A user as served to downstream reference-data fetches
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub org_id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub org_id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

/// Fields left as `None` keep their current value
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("email already registered: {0}")]
    EmailTaken(String),

    #[error("user {0} not found")]
    NotFound(Uuid),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

pub async fn create_user(pool: &PgPool, new: NewUser) -> Result<User, UserError> {
    let mut tx = pool.begin().await?;

    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&new.email)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(UserError::EmailTaken(new.email));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, org_id, email, name, phone)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, org_id, email, name, phone, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&new.org_id)
    .bind(&new.email)
    .bind(&new.name)
    .bind(&new.phone)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // A concurrent insert can win the race after the check above
        if is_unique_violation(&e) {
            UserError::EmailTaken(new.email.clone())
        } else {
            UserError::Database(e)
        }
    })?;

    insert_outbox_event(
        &mut tx,
        &NewOutboxEvent::user(user.id.to_string(), &user.org_id, ChangeAction::Insert),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(user_id = %user.id, org_id = %user.org_id, "User created");
    Ok(user)
}

pub async fn update_user(
    pool: &PgPool,
    org_id: &str,
    id: Uuid,
    update: UserUpdate,
) -> Result<User, UserError> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET name = COALESCE($3, name),
            phone = COALESCE($4, phone),
            updated_at = NOW()
        WHERE id = $1 AND org_id = $2
        RETURNING id, org_id, email, name, phone, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(&update.name)
    .bind(&update.phone)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(UserError::NotFound(id))?;

    insert_outbox_event(
        &mut tx,
        &NewOutboxEvent::user(id.to_string(), org_id, ChangeAction::Update),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(user_id = %id, org_id = %org_id, "User updated");
    Ok(user)
}

pub async fn delete_user(pool: &PgPool, org_id: &str, id: Uuid) -> Result<(), UserError> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1 AND org_id = $2")
        .bind(id)
        .bind(org_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(UserError::NotFound(id));
    }

    insert_outbox_event(
        &mut tx,
        &NewOutboxEvent::user(id.to_string(), org_id, ChangeAction::Delete),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(user_id = %id, org_id = %org_id, "User deleted");
    Ok(())
}

/// Tenant-scoped read; a user of another org is reported as absent
pub async fn find_user(pool: &PgPool, org_id: &str, id: Uuid) -> Result<Option<User>, UserError> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, org_id, email, name, phone, created_at, updated_at
        FROM users
        WHERE id = $1 AND org_id = $2
        "#,
    )
    .bind(id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}
