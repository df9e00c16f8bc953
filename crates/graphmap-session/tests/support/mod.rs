//! In-memory driver that replays scripted responses and records every
//! query it is asked to run.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use graphmap_core::events::{EventKind, EventListener, PersistenceEvent};
use graphmap_core::{Direction, Schema, TransactionType, TypeDescription, Value};
use graphmap_session::{Driver, DriverError, DriverTransaction, Query, Row};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Result<Vec<Row>, String>>,
    queries: Vec<Query>,
    begins: Vec<TransactionType>,
    commits: usize,
    rollbacks: usize,
}

/// Clones share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows the next query returns. Unscripted queries return no
    /// rows.
    pub fn respond(&self, rows: Vec<Row>) {
        self.script.lock().responses.push_back(Ok(rows));
    }

    pub fn fail(&self, message: &str) {
        self.script
            .lock()
            .responses
            .push_back(Err(message.to_string()));
    }

    pub fn queries(&self) -> Vec<Query> {
        self.script.lock().queries.clone()
    }

    pub fn last_query(&self) -> Option<Query> {
        self.script.lock().queries.last().cloned()
    }

    pub fn begins(&self) -> Vec<TransactionType> {
        self.script.lock().begins.clone()
    }

    pub fn commits(&self) -> usize {
        self.script.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.script.lock().rollbacks
    }
}

impl Driver for ScriptedDriver {
    type Transaction = ScriptedTransaction;

    fn begin(
        &self,
        transaction_type: TransactionType,
        _bookmarks: &[String],
    ) -> impl Future<Output = Result<ScriptedTransaction, DriverError>> + Send {
        let script = self.script.clone();
        async move {
            script.lock().begins.push(transaction_type);
            Ok(ScriptedTransaction { script })
        }
    }
}

pub struct ScriptedTransaction {
    script: Arc<Mutex<Script>>,
}

impl DriverTransaction for ScriptedTransaction {
    fn execute(
        &mut self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, DriverError>> + Send {
        let response = {
            let mut script = self.script.lock();
            script.queries.push(query.clone());
            script.responses.pop_front()
        };
        async move {
            match response {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(message)) => Err(DriverError::Rejected(message)),
                None => Ok(Vec::new()),
            }
        }
    }

    fn commit(self) -> impl Future<Output = Result<Option<String>, DriverError>> + Send {
        async move {
            self.script.lock().commits += 1;
            Ok(None)
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), DriverError>> + Send {
        async move {
            self.script.lock().rollbacks += 1;
            Ok(())
        }
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            TypeDescription::node("Person")
                .relationship_field("friends", "KNOWS", Direction::Outgoing, "Person")
                .relationship_field("ratings", "RATED", Direction::Outgoing, "Person"),
            TypeDescription::node("Account").version("version"),
            TypeDescription::relationship("Rating", "RATED"),
        ])
        .unwrap(),
    )
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The row `load` reads for a node.
pub fn node_row(id: i64, labels: &[&str], properties: &[(&str, Value)]) -> Row {
    let props: BTreeMap<String, Value> = properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    row(&[
        ("id", Value::from(id)),
        (
            "labels",
            Value::List(labels.iter().map(|l| Value::from(*l)).collect()),
        ),
        ("properties", Value::Map(props)),
    ])
}

/// The row `load` reads for a relationship.
pub fn relationship_row(
    start: i64,
    relationship_type: &str,
    end: i64,
    id: i64,
    properties: &[(&str, Value)],
) -> Row {
    let props: BTreeMap<String, Value> = properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    row(&[
        ("start", Value::from(start)),
        ("type", Value::from(relationship_type)),
        ("end", Value::from(end)),
        ("rid", Value::from(id)),
        ("properties", Value::Map(props)),
    ])
}

/// Records the kinds of every event it sees.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub kinds: Mutex<Vec<EventKind>>,
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &PersistenceEvent) {
        self.kinds.lock().push(event.kind);
    }
}
