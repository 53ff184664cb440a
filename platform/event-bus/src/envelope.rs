//! # Change Event Envelope
//!
//! Wire form of a change notification, shared by the publishing relay and the
//! consuming synchronizer. The envelope is only a change *signal*: it names
//! the entity and the action, never the entity's data. Consumers re-fetch the
//! authoritative state from the system of record.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Outbox row id (idempotency / diagnostics)
//! - `entity.type` / `entity.id`: Aggregate kind and id
//! - `action`: `INSERT`, `UPDATE` or `DELETE`
//! - `timestamp`: When the change was recorded in the outbox
//! - `source_system`: Producer identifier
//! - `tenant_context.org_id`: Owning tenant, required by every consumer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Header carrying the payload media type
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Header carrying the change action, for filtering without parsing the body
pub const EVENT_TYPE_HEADER: &str = "event-type";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Kind of mutation a change event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Insert => "INSERT",
            ChangeAction::Update => "UPDATE",
            ChangeAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeAction::Insert),
            "UPDATE" => Ok(ChangeAction::Update),
            "DELETE" => Ok(ChangeAction::Delete),
            other => Err(EnvelopeError::UnknownAction(other.to_string())),
        }
    }
}

/// The entity a change event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
}

/// Tenant the changed entity belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

/// Change notification as it travels on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEventEnvelope {
    pub event_id: Uuid,
    pub entity: EntityRef,
    pub action: ChangeAction,
    pub timestamp: DateTime<Utc>,
    pub source_system: String,
    #[serde(default)]
    pub tenant_context: TenantContext,
}

/// Errors produced while decoding or validating an envelope
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("envelope {event_id} is missing tenant_context.org_id")]
    MissingOrgId { event_id: Uuid },

    #[error("unknown change action: {0}")]
    UnknownAction(String),

    #[error("failed to serialize envelope: {0}")]
    Serialization(String),
}

impl EnvelopeError {
    /// Stable name of the error variant, used when tagging dead letters
    pub fn kind(&self) -> &'static str {
        match self {
            EnvelopeError::Malformed(_) => "MalformedEnvelope",
            EnvelopeError::MissingOrgId { .. } => "MissingTenantContext",
            EnvelopeError::UnknownAction(_) => "UnknownAction",
            EnvelopeError::Serialization(_) => "SerializationError",
        }
    }
}

impl ChangeEventEnvelope {
    /// Decode an envelope from a raw bus payload
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Encode the envelope as a bus payload
    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Check the tenant invariant and produce a [`ChangeEvent`]
    ///
    /// An absent, empty or whitespace-only `org_id` is rejected.
    pub fn validate(self) -> Result<ChangeEvent, EnvelopeError> {
        let org_id = match self.tenant_context.org_id {
            Some(org_id) if !org_id.trim().is_empty() => org_id,
            _ => {
                return Err(EnvelopeError::MissingOrgId {
                    event_id: self.event_id,
                })
            }
        };

        Ok(ChangeEvent {
            event_id: self.event_id,
            entity: self.entity,
            action: self.action,
            timestamp: self.timestamp,
            source_system: self.source_system,
            org_id,
        })
    }
}

/// A change event whose envelope passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_id: Uuid,
    pub entity: EntityRef,
    pub action: ChangeAction,
    pub timestamp: DateTime<Utc>,
    pub source_system: String,
    pub org_id: String,
}
