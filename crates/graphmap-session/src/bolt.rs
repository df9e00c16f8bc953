//! Neo4j driver over Bolt, backed by `neo4rs`.

use std::collections::HashMap;
use std::future::Future;

use graphmap_core::config::Neo4jConfig;
use graphmap_core::{TransactionType, Value};
use neo4rs::{BoltNull, BoltType, ConfigBuilder, Graph, Txn};

use crate::driver::{Driver, DriverTransaction, Query, Row};
use crate::error::DriverError;

/// Pooled Bolt connection. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct BoltDriver {
    graph: Graph,
}

impl BoltDriver {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, DriverError> {
        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

impl Driver for BoltDriver {
    type Transaction = BoltTransaction;

    fn begin(
        &self,
        transaction_type: TransactionType,
        bookmarks: &[String],
    ) -> impl Future<Output = Result<BoltTransaction, DriverError>> + Send {
        async move {
            // neo4rs 0.8 routes every explicit transaction through the
            // default access mode and does not accept bookmarks.
            tracing::debug!(
                %transaction_type,
                bookmarks = bookmarks.len(),
                "Beginning Bolt transaction"
            );
            let txn = self.graph.start_txn().await?;
            Ok(BoltTransaction { txn })
        }
    }
}

/// An open `neo4rs` transaction.
pub struct BoltTransaction {
    txn: Txn,
}

impl DriverTransaction for BoltTransaction {
    fn execute(
        &mut self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, DriverError>> + Send {
        async move {
            let q = query
                .parameters
                .iter()
                .fold(neo4rs::query(&query.cypher), |q, (key, value)| {
                    q.param(key, to_bolt(value))
                });

            let mut stream = self.txn.execute(q).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next(self.txn.handle()).await? {
                let mut decoded = Row::new();
                for column in &query.columns {
                    let value: Value = row.get(column).map_err(|e| DriverError::Decode {
                        column: column.clone(),
                        message: e.to_string(),
                    })?;
                    decoded.insert(column.clone(), value);
                }
                rows.push(decoded);
            }
            Ok(rows)
        }
    }

    fn commit(self) -> impl Future<Output = Result<Option<String>, DriverError>> + Send {
        async move {
            self.txn.commit().await?;
            Ok(None)
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), DriverError>> + Send {
        async move {
            self.txn.rollback().await?;
            Ok(())
        }
    }
}

/// Convert a property value into its Bolt representation.
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => (*b).into(),
        Value::Integer(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::String(s) => s.clone().into(),
        Value::List(items) => items.iter().map(to_bolt).collect::<Vec<BoltType>>().into(),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), to_bolt(v)))
            .collect::<HashMap<String, BoltType>>()
            .into(),
    }
}
