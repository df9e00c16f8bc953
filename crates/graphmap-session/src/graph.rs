//! The object graph handed to a save: entities in an arena, relationships
//! as data between arena slots.

use std::sync::Arc;

use graphmap_context::{handle, EntityHandle};
use graphmap_core::Entity;

/// Position of a node entity in an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

/// A relationship between two arena slots. When `entity` is set the
/// relationship is itself a relationship entity and its type comes from
/// that entity's schema.
#[derive(Debug, Clone)]
pub struct Edge {
    pub start: NodeIndex,
    pub end: NodeIndex,
    pub relationship_type: String,
    pub entity: Option<EntityHandle>,
}

/// Everything one save should make true in the database.
///
/// A node's edges in the graph are its complete set of relationships for
/// the types its schema declares: a remembered relationship that is no
/// longer present is deleted.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    nodes: Vec<EntityHandle>,
    edges: Vec<Edge>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph holding a single entity.
    pub fn single(entity: EntityHandle) -> Self {
        let mut graph = Self::new();
        graph.add(entity);
        graph
    }

    /// Add a node entity. Adding the same handle twice returns the slot it
    /// already occupies.
    pub fn add(&mut self, entity: EntityHandle) -> NodeIndex {
        if let Some(i) = self.nodes.iter().position(|n| Arc::ptr_eq(n, &entity)) {
            return NodeIndex(i);
        }
        self.nodes.push(entity);
        NodeIndex(self.nodes.len() - 1)
    }

    /// Wrap `entity` in a fresh handle and add it.
    pub fn add_entity(&mut self, entity: Entity) -> (NodeIndex, EntityHandle) {
        let h = handle(entity);
        (self.add(h.clone()), h)
    }

    /// `(start)-[:relationship_type]->(end)`.
    pub fn relate(&mut self, start: NodeIndex, relationship_type: &str, end: NodeIndex) {
        self.edges.push(Edge {
            start,
            end,
            relationship_type: relationship_type.to_string(),
            entity: None,
        });
    }

    /// Connect `start` and `end` through a relationship entity.
    pub fn relate_entity(
        &mut self,
        start: NodeIndex,
        end: NodeIndex,
        relationship_type: &str,
        entity: EntityHandle,
    ) {
        self.edges.push(Edge {
            start,
            end,
            relationship_type: relationship_type.to_string(),
            entity: Some(entity),
        });
    }

    pub fn node(&self, index: NodeIndex) -> Option<&EntityHandle> {
        self.nodes.get(index.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &EntityHandle)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedups_by_handle() {
        let mut graph = ObjectGraph::new();
        let (a, h) = graph.add_entity(Entity::new("Person"));
        assert_eq!(graph.add(h), a);
        let (b, _) = graph.add_entity(Entity::new("Person"));
        assert_ne!(a, b);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_cycles_are_plain_data() {
        let mut graph = ObjectGraph::new();
        let (a, _) = graph.add_entity(Entity::new("Person"));
        let (b, _) = graph.add_entity(Entity::new("Person"));
        graph.relate(a, "KNOWS", b);
        graph.relate(b, "KNOWS", a);
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.edges()[1].start, b);
    }
}
