use chrono::{DateTime, Utc};
use event_bus::ChangeAction;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::OutboxError;

/// Aggregate type written for user changes
pub const USER_AGGREGATE: &str = "USER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            other => Err(OutboxError::InvalidRow(format!("unknown status {other}"))),
        }
    }
}

/// A change event recorded in the outbox
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: ChangeAction,
    /// Always carries at least `org_id`
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Owning tenant, read from the payload
    pub fn org_id(&self) -> Option<&str> {
        self.payload.get("org_id").and_then(|v| v.as_str())
    }
}

/// Fields supplied by the writer; id, status and timestamps are assigned on insert
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: ChangeAction,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// A user change, with the tenant recorded in the payload
    pub fn user(user_id: impl Into<String>, org_id: &str, action: ChangeAction) -> Self {
        Self {
            aggregate_type: USER_AGGREGATE.to_string(),
            aggregate_id: user_id.into(),
            event_type: action,
            payload: serde_json::json!({ "org_id": org_id }),
        }
    }
}

/// Database row shape; text columns are checked when converting
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let event_type = row
            .event_type
            .parse::<ChangeAction>()
            .map_err(|e| OutboxError::InvalidRow(e.to_string()))?;

        Ok(OutboxEvent {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type,
            payload: row.payload,
            status: row.status.parse()?,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(event_type: &str, status: &str) -> OutboxRow {
        OutboxRow {
            id: Uuid::new_v4(),
            aggregate_type: "USER".to_string(),
            aggregate_id: "u1".to_string(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({ "org_id": "o1" }),
            status: status.to_string(),
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[test]
    fn test_row_converts_to_event() {
        let event = OutboxEvent::try_from(row("UPDATE", "PENDING")).unwrap();
        assert_eq!(event.event_type, ChangeAction::Update);
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.org_id(), Some("o1"));
    }

    #[test]
    fn test_row_with_unknown_values_is_rejected() {
        assert!(matches!(
            OutboxEvent::try_from(row("UPSERT", "PENDING")),
            Err(OutboxError::InvalidRow(_))
        ));
        assert!(matches!(
            OutboxEvent::try_from(row("INSERT", "DONE")),
            Err(OutboxError::InvalidRow(_))
        ));
    }

    #[test]
    fn test_new_user_event_carries_org_id() {
        let new = NewOutboxEvent::user("u1", "o1", ChangeAction::Delete);
        assert_eq!(new.aggregate_type, USER_AGGREGATE);
        assert_eq!(new.payload["org_id"], "o1");
    }
}
