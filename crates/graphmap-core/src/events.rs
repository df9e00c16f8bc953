//! Persistence events delivered to session listeners.
//!
//! Listeners observe saves and deletes around the statement round-trip.
//! They are invoked synchronously on the calling task and must not block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PreSave,
    PostSave,
    PreDelete,
    PostDelete,
}

/// An event emitted by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub type_name: String,
    /// Database id of the entity, if it has one at the time of the event.
    pub entity_id: Option<i64>,
}

impl PersistenceEvent {
    pub fn new(kind: EventKind, type_name: &str, entity_id: Option<i64>) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            kind,
            type_name: type_name.to_string(),
            entity_id,
        }
    }
}

/// Receives persistence events from a session.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PersistenceEvent);
}
