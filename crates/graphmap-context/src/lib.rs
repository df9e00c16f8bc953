//! graphmap-context: what a session believes is in the database.
//!
//! The registers in this crate remember every entity, relationship and
//! label set the session has read or written, so that the statement
//! compiler can emit only what changed. Each register is individually
//! thread-safe; invariants spanning registers are maintained by
//! [`MappingContext`].

pub mod context;
pub mod entity_register;
pub mod label_history;
pub mod memo;
pub mod relationship_register;
pub mod type_register;

use std::sync::Arc;

use graphmap_core::{Entity, NodeId, RelationshipId};
use parking_lot::RwLock;

pub use context::{
    ContextError, MappingContext, TrackedEntity, TrackedRelationship, TrackedWrites,
};
pub use entity_register::EntityRegister;
pub use label_history::{LabelDiff, LabelHistory, LabelHistoryRegister};
pub use memo::EntityMemo;
pub use relationship_register::RelationshipRegister;
pub use type_register::TypeRegister;

/// Shared, mutable reference to an entity owned by a session.
///
/// Loading an id that is already resident hands back a clone of the same
/// `Arc`, so every holder observes the same value.
pub type EntityHandle = Arc<RwLock<Entity>>;

/// Wrap an entity snapshot in a fresh handle.
pub fn handle(entity: Entity) -> EntityHandle {
    Arc::new(RwLock::new(entity))
}

/// Identity of a registered entity, tagged with its id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Node(NodeId),
    Relationship(RelationshipId),
}
