//! Snapshot hashes of entities as last read from or written to the store.
//!
//! An entity is clean when a fresh hash of its persistable state equals the
//! hash remembered for its identity.

use std::collections::{BTreeSet, HashMap};

use graphmap_core::{Entity, Properties, Value};
use parking_lot::RwLock;
use serde::Serialize;

use crate::EntityKey;

/// Hashable view of an entity: everything that is written to the store.
#[derive(Serialize)]
struct HashableEntity<'a> {
    type_name: &'a str,
    labels: &'a BTreeSet<String>,
    properties: &'a Properties,
    version: &'a Option<i64>,
}

/// Compute the BLAKE3 hash of an entity's persistable state.
///
/// Serializes the snapshot to canonical JSON (property and label order are
/// fixed by their ordered collections) and returns the hex-encoded hash.
pub fn snapshot_hash(entity: &Entity) -> String {
    let hashable = HashableEntity {
        type_name: &entity.type_name,
        labels: &entity.labels,
        properties: &entity.properties,
        version: &entity.version,
    };

    let json = serde_json::to_vec(&hashable).unwrap_or_default();
    blake3::hash(&json).to_hex().to_string()
}

/// What was remembered about one entity.
#[derive(Debug, Clone)]
struct Snapshot {
    hash: String,
    properties: Properties,
}

/// Remembered snapshot per registered entity: the hash for the dirty check
/// and the property values for computing deltas.
#[derive(Debug, Default)]
pub struct EntityMemo {
    snapshots: RwLock<HashMap<EntityKey, Snapshot>>,
}

impl EntityMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, key: EntityKey, entity: &Entity) {
        let snapshot = Snapshot {
            hash: snapshot_hash(entity),
            properties: entity.properties.clone(),
        };
        self.snapshots.write().insert(key, snapshot);
    }

    /// True if `entity` still matches the snapshot remembered for `key`.
    pub fn remembered(&self, key: EntityKey, entity: &Entity) -> bool {
        match self.snapshots.read().get(&key) {
            Some(snapshot) => snapshot.hash == snapshot_hash(entity),
            None => false,
        }
    }

    /// Properties of `entity` that differ from the remembered values.
    /// Properties that disappeared map to `Value::Null`; everything is
    /// returned when nothing was remembered.
    pub fn delta(&self, key: EntityKey, entity: &Entity) -> Properties {
        let snapshots = self.snapshots.read();
        let Some(previous) = snapshots.get(&key).map(|s| &s.properties) else {
            return entity.properties.clone();
        };

        let mut delta: Properties = entity
            .properties
            .iter()
            .filter(|(k, v)| previous.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for key in previous.keys() {
            if !entity.properties.contains_key(key) {
                delta.insert(key.clone(), Value::Null);
            }
        }
        delta
    }

    /// The value property `name` had when `key` was last remembered.
    pub fn remembered_property(&self, key: EntityKey, name: &str) -> Option<Value> {
        self.snapshots
            .read()
            .get(&key)
            .and_then(|s| s.properties.get(name))
            .cloned()
    }

    pub fn forget(&self, key: EntityKey) {
        self.snapshots.write().remove(&key);
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
    }
}
