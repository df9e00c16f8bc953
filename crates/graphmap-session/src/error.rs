use graphmap_context::ContextError;
use graphmap_core::{SchemaError, TransactionType};
use graphmap_cypher::CompileError;

use crate::transaction::TransactionStatus;

/// Failures reported by a driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Failed to decode column {column}: {message}")]
    Decode { column: String, message: String },
}

/// Misuse of the transaction protocol.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {0} is not an active transaction of this session")]
    NotActive(uuid::Uuid),

    #[error("Incompatible transaction type specified: must be '{current}'")]
    IncompatibleType {
        current: TransactionType,
        requested: TransactionType,
    },

    #[error("Transaction cannot commit: rollback pending")]
    RollbackPending,

    #[error("Transaction cannot commit: status is {0}")]
    CannotCommit(TransactionStatus),

    #[error("Transaction is no longer open: status is {0}")]
    NotOpen(TransactionStatus),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Everything a session operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] ContextError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Transaction error: {0}")]
    Transaction(TransactionError),

    #[error("Optimistic locking conflict on {type_name} {id}: version {version} is stale")]
    OptimisticLocking {
        type_name: String,
        id: i64,
        version: i64,
    },

    #[error("Result processing error: {0}")]
    ResultProcessing(#[source] DriverError),

    #[error("Not found: {type_name} with id {id}")]
    NotFound { type_name: String, id: i64 },
}

impl From<DriverError> for SessionError {
    fn from(e: DriverError) -> Self {
        SessionError::ResultProcessing(e)
    }
}

impl From<TransactionError> for SessionError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::Driver(e) => SessionError::ResultProcessing(e),
            other => SessionError::Transaction(other),
        }
    }
}

impl SessionError {
    pub fn is_optimistic_locking(&self) -> bool {
        matches!(self, SessionError::OptimisticLocking { .. })
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
