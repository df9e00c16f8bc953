//! graphmap-core: Shared types, schema description, and configuration for graphmap.
//!
//! This crate provides the foundational types used across all graphmap components:
//! - Node and relationship identities, property values, entity snapshots
//! - Mapped relationship facts remembered by a session
//! - The validated schema description consumed by the compiler and registers
//! - Persistence events delivered to session listeners
//! - Configuration management

pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod types;

pub use error::SchemaError;
pub use schema::{Direction, EntityKind, EntitySchema, RelationshipField, Schema, TypeDescription};
pub use types::{
    Entity, MappedRelationship, NodeId, Properties, RelationshipId, TransactionType, Value,
};
