//! Change-set documents and their conversion into an object graph.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use graphmap_context::EntityHandle;
use graphmap_core::{Entity, Schema, TypeDescription};
use graphmap_session::ObjectGraph;
use serde::Deserialize;

use crate::error::{ChangeSetError, Result};

/// One entity, addressable by `key` from relationships in the same file.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedEntity {
    pub key: String,
    #[serde(flatten)]
    pub entity: Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipSpec {
    pub start: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub end: String,
    /// Present when the relationship is itself an entity.
    #[serde(default)]
    pub entity: Option<Entity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeSet {
    pub schema: Vec<TypeDescription>,
    #[serde(default)]
    pub nodes: Vec<KeyedEntity>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

/// A change set resolved against its schema.
#[derive(Debug)]
pub struct LoadedChangeSet {
    pub schema: Arc<Schema>,
    pub graph: ObjectGraph,
    /// Entity handles in file order, by key.
    pub entities: Vec<(String, EntityHandle)>,
}

impl ChangeSet {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let change_set: ChangeSet = serde_json::from_str(&raw)?;
        tracing::debug!(
            path = %path.display(),
            nodes = change_set.nodes.len(),
            relationships = change_set.relationships.len(),
            "Change set read"
        );
        Ok(change_set)
    }

    /// Validate the schema and build the object graph.
    pub fn load(self) -> Result<LoadedChangeSet> {
        let schema = Arc::new(Schema::new(self.schema)?);
        let mut graph = ObjectGraph::new();
        let mut by_key = HashMap::new();
        let mut entities = Vec::new();

        for node in self.nodes {
            if by_key.contains_key(&node.key) {
                return Err(ChangeSetError::DuplicateKey(node.key));
            }
            schema.get(&node.entity.type_name)?;
            let (index, handle) = graph.add_entity(node.entity);
            by_key.insert(node.key.clone(), index);
            entities.push((node.key, handle));
        }

        for rel in self.relationships {
            let start = *by_key
                .get(&rel.start)
                .ok_or_else(|| ChangeSetError::UnknownKey(rel.start.clone()))?;
            let end = *by_key
                .get(&rel.end)
                .ok_or_else(|| ChangeSetError::UnknownKey(rel.end.clone()))?;
            match rel.entity {
                Some(entity) => {
                    schema.get(&entity.type_name)?;
                    graph.relate_entity(
                        start,
                        end,
                        &rel.relationship_type,
                        graphmap_context::handle(entity),
                    );
                }
                None => graph.relate(start, &rel.relationship_type, end),
            }
        }

        Ok(LoadedChangeSet {
            schema,
            graph,
            entities,
        })
    }
}
