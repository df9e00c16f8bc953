//! The contract between a session and whatever executes its statements.

use std::collections::BTreeMap;
use std::future::Future;

use graphmap_core::{TransactionType, Value};
use graphmap_cypher::{Parameters, Statement};

use crate::error::DriverError;

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A statement ready for a driver: text, parameters and the columns the
/// caller will read back.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub cypher: String,
    pub parameters: Parameters,
    pub columns: Vec<String>,
}

impl Query {
    pub fn new(cypher: impl Into<String>) -> Self {
        Self {
            cypher: cypher.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

impl From<&Statement> for Query {
    fn from(statement: &Statement) -> Self {
        Self {
            cypher: statement.cypher.clone(),
            parameters: statement.parameters.clone(),
            columns: statement
                .returns
                .iter()
                .map(|r| r.as_str().to_string())
                .collect(),
        }
    }
}

/// Opens native transactions.
pub trait Driver: Send + Sync + 'static {
    type Transaction: DriverTransaction;

    /// Begin a native transaction. Bookmarks are forwarded untouched.
    fn begin(
        &self,
        transaction_type: TransactionType,
        bookmarks: &[String],
    ) -> impl Future<Output = Result<Self::Transaction, DriverError>> + Send;
}

/// A native transaction owned by one [`Transaction`](crate::Transaction).
pub trait DriverTransaction: Send + Sized + 'static {
    fn execute(
        &mut self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, DriverError>> + Send;

    /// Commit, returning the bookmark of the commit if the transport has one.
    fn commit(self) -> impl Future<Output = Result<Option<String>, DriverError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), DriverError>> + Send;
}
