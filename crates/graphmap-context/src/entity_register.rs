//! Identity map from database id to live entity handle.

use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::EntityHandle;

/// Concurrent id → handle map. At most one handle per id; the first writer
/// wins.
#[derive(Debug)]
pub struct EntityRegister<K: Eq + Hash> {
    entries: DashMap<K, EntityHandle>,
}

impl<K: Eq + Hash + Clone> Default for EntityRegister<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> EntityRegister<K> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Bind `id` to `entity`. Returns `false` and leaves the register
    /// untouched if `id` is already bound.
    pub fn add(&self, id: K, entity: EntityHandle) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entity);
                true
            }
        }
    }

    pub fn get(&self, id: &K) -> Option<EntityHandle> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&self, id: &K) -> Option<EntityHandle> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graphmap_core::{Entity, NodeId};

    use super::*;
    use crate::handle;

    #[test]
    fn test_first_writer_wins() {
        let register = EntityRegister::new();
        let first = handle(Entity::new("Person").with_property("name", "first"));
        let second = handle(Entity::new("Person").with_property("name", "second"));

        assert!(register.add(NodeId(1), first.clone()));
        assert!(!register.add(NodeId(1), second));

        let stored = register.get(&NodeId(1)).unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let register = EntityRegister::new();
        register.add(NodeId(1), handle(Entity::new("Person")));
        register.add(NodeId(2), handle(Entity::new("Person")));

        assert!(register.remove(&NodeId(1)).is_some());
        assert!(!register.contains(&NodeId(1)));
        assert!(register.remove(&NodeId(1)).is_none());

        register.clear();
        assert!(register.is_empty());
    }

    #[test]
    fn test_concurrent_adds_bind_once() {
        let register = Arc::new(EntityRegister::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let register = Arc::clone(&register);
                std::thread::spawn(move || {
                    register.add(NodeId(42), handle(Entity::new("Person").with_property("t", i)))
                })
            })
            .collect();

        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(register.len(), 1);
    }
}
