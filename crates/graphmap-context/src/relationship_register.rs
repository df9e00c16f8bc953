//! Set of relationships the session believes are persisted.

use std::collections::HashSet;

use graphmap_core::{MappedRelationship, NodeId, RelationshipId};
use parking_lot::RwLock;

/// Deduplicated set of [`MappedRelationship`] facts.
#[derive(Debug, Default)]
pub struct RelationshipRegister {
    facts: RwLock<HashSet<MappedRelationship>>,
}

impl RelationshipRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Returns `false` if an equal fact was already present.
    pub fn add(&self, relationship: MappedRelationship) -> bool {
        self.facts.write().insert(relationship)
    }

    pub fn remove(&self, relationship: &MappedRelationship) -> bool {
        self.facts.write().remove(relationship)
    }

    pub fn contains(&self, relationship: &MappedRelationship) -> bool {
        self.facts.read().contains(relationship)
    }

    /// Every fact with `node` as start or end.
    pub fn touching(&self, node: NodeId) -> Vec<MappedRelationship> {
        self.facts
            .read()
            .iter()
            .filter(|r| r.touches(node))
            .cloned()
            .collect()
    }

    /// Facts carrying the given relationship-entity id.
    pub fn with_entity_id(&self, id: RelationshipId) -> Vec<MappedRelationship> {
        self.facts
            .read()
            .iter()
            .filter(|r| r.relationship_entity_id == Some(id))
            .cloned()
            .collect()
    }

    /// Remove and return every fact with `node` as start or end.
    pub fn remove_touching(&self, node: NodeId) -> Vec<MappedRelationship> {
        let mut facts = self.facts.write();
        let removed: Vec<_> = facts.iter().filter(|r| r.touches(node)).cloned().collect();
        for r in &removed {
            facts.remove(r);
        }
        removed
    }

    /// Snapshot of all facts.
    pub fn snapshot(&self) -> Vec<MappedRelationship> {
        self.facts.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.read().is_empty()
    }

    pub fn clear(&self) {
        self.facts.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_facts_collapse() {
        let register = RelationshipRegister::new();
        assert!(register.add(MappedRelationship::new(NodeId(1), "KNOWS", NodeId(2))));
        assert!(!register.add(MappedRelationship::new(NodeId(1), "KNOWS", NodeId(2))));
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn test_direction_and_type_distinguish_facts() {
        let register = RelationshipRegister::new();
        register.add(MappedRelationship::new(NodeId(1), "KNOWS", NodeId(2)));
        register.add(MappedRelationship::new(NodeId(2), "KNOWS", NodeId(1)));
        register.add(MappedRelationship::new(NodeId(1), "LIKES", NodeId(2)));
        assert_eq!(register.len(), 3);
    }

    #[test]
    fn test_remove_touching() {
        let register = RelationshipRegister::new();
        register.add(MappedRelationship::new(NodeId(1), "KNOWS", NodeId(2)));
        register.add(MappedRelationship::new(NodeId(3), "KNOWS", NodeId(1)));
        register.add(MappedRelationship::new(NodeId(2), "KNOWS", NodeId(3)));

        let removed = register.remove_touching(NodeId(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(register.len(), 1);
        assert!(register.touching(NodeId(1)).is_empty());
    }

    #[test]
    fn test_lookup_by_entity_id() {
        let register = RelationshipRegister::new();
        register.add(
            MappedRelationship::new(NodeId(1), "RATED", NodeId(2)).with_entity_id(RelationshipId(9)),
        );
        assert_eq!(register.with_entity_id(RelationshipId(9)).len(), 1);
        assert!(register.with_entity_id(RelationshipId(8)).is_empty());
    }
}
