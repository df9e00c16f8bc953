//! Core domain types for the object-graph mapper.
//!
//! Entities are plain attribute bags: the mapper never reflects over user
//! structs. Whatever produces an [`Entity`] (a derive, a hand-written
//! conversion, a JSON change set) hands the core a normalized snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Identity ──────────────────────────────────────────────────────

/// Database-assigned identity of a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database-assigned identity of a relationship.
///
/// Node ids and relationship ids are independent spaces: `NodeId(3)` and
/// `RelationshipId(3)` may both exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipId(pub i64);

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Property Values ───────────────────────────────────────────────

/// A property value. Entities only store scalars and lists; maps appear in
/// driver rows (`properties(n)`) and statement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Property bag keyed by property name. Ordered so that rendered
/// statements and snapshot hashes are deterministic.
pub type Properties = BTreeMap<String, Value>;

// ── Transactions ──────────────────────────────────────────────────

/// Access mode requested for a transaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::ReadOnly => write!(f, "READ_ONLY"),
            TransactionType::ReadWrite => write!(f, "READ_WRITE"),
        }
    }
}

// ── Entity Snapshot ───────────────────────────────────────────────

/// Normalized snapshot of one mapped object.
///
/// `id` is absent until the object has been persisted; once assigned it
/// never changes for the lifetime of the object in a session (except that a
/// rollback resets it to `None`, since the database discarded it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Name of the schema type describing this entity.
    pub type_name: String,
    #[serde(default)]
    pub id: Option<i64>,
    /// Dynamic labels carried by this instance, in addition to the schema's
    /// static labels.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Optimistic-locking version; `None` until first save of a versioned type.
    #[serde(default)]
    pub version: Option<i64>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            labels: BTreeSet::new(),
            properties: Properties::new(),
            version: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.id.map(NodeId)
    }

    pub fn relationship_id(&self) -> Option<RelationshipId> {
        self.id.map(RelationshipId)
    }
}

// ── Mapped Relationships ──────────────────────────────────────────

/// A relationship the session believes is currently persisted.
///
/// Equality covers all four fields. Facts without a relationship-entity id
/// compare on start, end and type alone; a fact carrying an id never equals
/// one without, so several relationship entities of one type between the
/// same two nodes stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappedRelationship {
    pub start_node_id: NodeId,
    pub end_node_id: NodeId,
    pub relationship_type: String,
    pub relationship_entity_id: Option<RelationshipId>,
}

impl MappedRelationship {
    pub fn new(start: NodeId, relationship_type: impl Into<String>, end: NodeId) -> Self {
        Self {
            start_node_id: start,
            end_node_id: end,
            relationship_type: relationship_type.into(),
            relationship_entity_id: None,
        }
    }

    pub fn with_entity_id(mut self, id: RelationshipId) -> Self {
        self.relationship_entity_id = Some(id);
        self
    }

    /// True if either endpoint is `node`.
    pub fn touches(&self, node: NodeId) -> bool {
        self.start_node_id == node || self.end_node_id == node
    }
}
