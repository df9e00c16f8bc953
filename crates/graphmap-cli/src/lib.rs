//! graphmap-cli: change-set files for the graphmap mapper.
//!
//! A change set is a JSON document carrying a schema, a list of entities
//! keyed by a local name, and the relationships between them. The binary
//! compiles it to Cypher or saves it through a session.

pub mod changeset;
pub mod error;
