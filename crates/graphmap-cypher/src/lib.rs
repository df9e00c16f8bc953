//! graphmap-cypher: compiles one walk of an object graph into a single
//! parameterized Cypher statement.
//!
//! The caller reports what it found (new nodes, changed nodes, new and
//! removed relationships) through [`Compiler`]; each event gets a
//! [`VarRef`] that later events use to name their endpoints. [`Compiler::compile`]
//! renders everything in a fixed order and returns `None` when there is
//! nothing to write.

pub mod compiler;
pub mod error;
pub mod identifiers;
pub mod node;
pub mod relationship;
pub mod statement;

pub use compiler::Compiler;
pub use error::CompileError;
pub use identifiers::{IdentifierManager, VarRef};
pub use node::NodeBuilder;
pub use relationship::RelationshipBuilder;
pub use statement::{Parameters, Statement};
