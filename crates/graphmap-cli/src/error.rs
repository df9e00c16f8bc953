//! Error types for the graphmap-cli crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangeSetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid change set: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] graphmap_core::SchemaError),

    #[error("Entity key {0} is declared more than once")]
    DuplicateKey(String),

    #[error("Relationship refers to unknown entity key {0}")]
    UnknownKey(String),
}

pub type Result<T> = std::result::Result<T, ChangeSetError>;
