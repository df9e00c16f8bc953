//! graphmap-session: the runtime half of the mapper.
//!
//! A [`Session`] owns one [`MappingContext`](graphmap_context::MappingContext)
//! and one [`TransactionManager`]. Saving walks an [`ObjectGraph`], compiles
//! the changes into a single statement, runs it through a [`Driver`] and
//! feeds the generated ids back into the context once the database has
//! confirmed the write.

pub mod bolt;
pub mod driver;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod response;
pub mod session;
pub mod transaction;

pub use bolt::{BoltDriver, BoltTransaction};
pub use driver::{Driver, DriverTransaction, Query, Row};
pub use error::{DriverError, SessionError, TransactionError};
pub use graph::{Edge, NodeIndex, ObjectGraph};
pub use mapper::{CompileContext, EntityGraphMapper};
pub use session::Session;
pub use transaction::{Transaction, TransactionManager, TransactionStatus};
