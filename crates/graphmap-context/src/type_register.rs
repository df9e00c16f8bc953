//! Polymorphic index of live entities by every type they satisfy.

use std::collections::HashMap;

use graphmap_core::Schema;
use parking_lot::RwLock;

use crate::{EntityHandle, EntityKey};

/// Entities indexed under their own type and every ancestor the schema
/// describes. Add and remove touch all indices under one lock, so an entity
/// is never visible under only part of its hierarchy.
#[derive(Debug, Default)]
pub struct TypeRegister {
    indices: RwLock<HashMap<String, HashMap<EntityKey, EntityHandle>>>,
}

impl TypeRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, schema: &Schema, type_name: &str, key: EntityKey, entity: EntityHandle) {
        let mut indices = self.indices.write();
        for name in hierarchy(schema, type_name) {
            indices
                .entry(name)
                .or_default()
                .insert(key, entity.clone());
        }
    }

    pub fn remove(&self, schema: &Schema, type_name: &str, key: EntityKey) {
        let mut indices = self.indices.write();
        for name in hierarchy(schema, type_name) {
            if let Some(index) = indices.get_mut(&name) {
                index.remove(&key);
                if index.is_empty() {
                    indices.remove(&name);
                }
            }
        }
    }

    /// All entities satisfying `type_name`.
    pub fn get(&self, type_name: &str) -> Vec<EntityHandle> {
        self.indices
            .read()
            .get(type_name)
            .map(|index| index.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys of all entities satisfying `type_name`.
    pub fn keys(&self, type_name: &str) -> Vec<EntityKey> {
        self.indices
            .read()
            .get(type_name)
            .map(|index| index.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, type_name: &str, key: EntityKey) -> bool {
        self.indices
            .read()
            .get(type_name)
            .is_some_and(|index| index.contains_key(&key))
    }

    /// Drop the whole index for `type_name`.
    pub fn delete(&self, type_name: &str) {
        self.indices.write().remove(type_name);
    }

    pub fn clear(&self) {
        self.indices.write().clear();
    }
}

fn hierarchy(schema: &Schema, type_name: &str) -> Vec<String> {
    let mut names = vec![type_name.to_string()];
    names.extend(schema.ancestors(type_name));
    names
}
