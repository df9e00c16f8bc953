//! The session-scoped aggregate of all change-tracking registers.

use std::collections::BTreeSet;
use std::sync::Arc;

use graphmap_core::{
    Entity, EntitySchema, MappedRelationship, NodeId, Properties, RelationshipId, Schema,
    SchemaError, Value,
};

use crate::entity_register::EntityRegister;
use crate::label_history::{LabelHistory, LabelHistoryRegister};
use crate::memo::EntityMemo;
use crate::relationship_register::RelationshipRegister;
use crate::type_register::TypeRegister;
use crate::{EntityHandle, EntityKey};

/// Errors from mapping-context operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Entity of type {type_name} has no identity and cannot be registered")]
    MissingIdentity { type_name: String },

    #[error("Entity type {type_name} is not a {expected} type")]
    WrongKind {
        type_name: String,
        expected: &'static str,
    },
}

/// An entity touched inside a transaction, as handed to the rollback
/// callback.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub handle: EntityHandle,
    /// The entity received its id inside the transaction being closed.
    pub created: bool,
}

/// A relationship fact recorded or removed inside a transaction.
#[derive(Debug, Clone)]
pub struct TrackedRelationship {
    pub fact: MappedRelationship,
    /// The fact was recorded, rather than removed, inside the transaction.
    pub added: bool,
}

/// Everything a transaction changed in the mapping context, as handed to
/// the rollback callback.
#[derive(Debug, Clone, Default)]
pub struct TrackedWrites {
    pub entities: Vec<TrackedEntity>,
    pub relationships: Vec<TrackedRelationship>,
}

impl TrackedWrites {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Hashable form of a primary-index value. Only scalars are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexValue {
    Bool(bool),
    Integer(i64),
    Float(u64),
    String(String),
}

impl IndexValue {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexValue::Bool(*b)),
            Value::Integer(i) => Some(IndexValue::Integer(*i)),
            Value::Float(f) => Some(IndexValue::Float(f.to_bits())),
            Value::String(s) => Some(IndexValue::String(s.clone())),
            Value::Null | Value::List(_) | Value::Map(_) => None,
        }
    }
}

type PrimaryIndexKey = (String, IndexValue);

/// Everything the session remembers about the database.
///
/// Lifetime matches the session: created on open, emptied by [`clear`],
/// dropped on close. Side effects are confined to the registers it owns.
///
/// [`clear`]: MappingContext::clear
#[derive(Debug)]
pub struct MappingContext {
    schema: Arc<Schema>,
    node_entities: EntityRegister<NodeId>,
    primary_index_entities: EntityRegister<PrimaryIndexKey>,
    relationship_entities: EntityRegister<RelationshipId>,
    relationships: RelationshipRegister,
    label_history: LabelHistoryRegister,
    types: TypeRegister,
    memo: EntityMemo,
}

impl MappingContext {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            node_entities: EntityRegister::new(),
            primary_index_entities: EntityRegister::new(),
            relationship_entities: EntityRegister::new(),
            relationships: RelationshipRegister::new(),
            label_history: LabelHistoryRegister::new(),
            types: TypeRegister::new(),
            memo: EntityMemo::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // ── Node Entities ────────────────────────────────────────────

    /// True iff a node entity with this id is registered.
    pub fn is_known(&self, id: NodeId) -> bool {
        self.node_entities.contains(&id)
    }

    pub fn get_node_entity(&self, id: NodeId) -> Option<EntityHandle> {
        self.node_entities.get(&id)
    }

    pub fn get_node_entity_by_primary_index(
        &self,
        type_name: &str,
        value: &Value,
    ) -> Option<EntityHandle> {
        let value = IndexValue::of(value)?;
        self.primary_index_entities
            .get(&(type_name.to_string(), value))
    }

    /// Register a persisted node entity.
    ///
    /// If the id is already bound, the register is left untouched and the
    /// resident handle is returned instead of `entity`.
    pub fn add_node_entity(&self, entity: EntityHandle) -> Result<EntityHandle, ContextError> {
        let (schema, id) = {
            let e = entity.read();
            let schema = self.node_schema(&e.type_name)?;
            let id = e.node_id().ok_or_else(|| ContextError::MissingIdentity {
                type_name: e.type_name.clone(),
            })?;
            (schema, id)
        };

        if !self.node_entities.add(id, entity.clone()) {
            return Ok(self.node_entities.get(&id).unwrap_or(entity));
        }

        let e = entity.read();
        let key = EntityKey::Node(id);
        self.types.add(&self.schema, &e.type_name, key, entity.clone());
        self.memo.remember(key, &e);
        self.label_history.push(id, e.labels.clone());
        if let Some(index_key) = primary_index_key(schema, &e) {
            self.primary_index_entities.add(index_key, entity.clone());
        }
        tracing::trace!(id = %id, type_name = %e.type_name, "Node entity registered");
        drop(e);
        Ok(entity)
    }

    /// Rebind `id` to `entity`, discarding whatever handle was registered.
    pub fn replace_node_entity(&self, entity: EntityHandle) -> Result<EntityHandle, ContextError> {
        let (type_name, id) = {
            let e = entity.read();
            let id = e.node_id().ok_or_else(|| ContextError::MissingIdentity {
                type_name: e.type_name.clone(),
            })?;
            (e.type_name.clone(), id)
        };
        if let Some(old) = self.node_entities.remove(&id) {
            self.unindex_node(&old.read(), id);
        }
        tracing::trace!(id = %id, type_name = %type_name, "Node entity replaced");
        self.add_node_entity(entity)
    }

    /// Deregister a node entity: its type indices, its identity binding,
    /// relationship facts touching it, and relationship entities hanging
    /// off it.
    pub fn remove_node_entity(&self, id: NodeId) -> Option<EntityHandle> {
        let entity = self.node_entities.remove(&id)?;
        self.unindex_node(&entity.read(), id);
        for fact in self.relationships.remove_touching(id) {
            if let Some(rel_id) = fact.relationship_entity_id {
                self.remove_relationship_entity(rel_id);
            }
        }
        tracing::trace!(id = %id, "Node entity removed");
        Some(entity)
    }

    // ── Relationship Entities ────────────────────────────────────

    pub fn get_relationship_entity(&self, id: RelationshipId) -> Option<EntityHandle> {
        self.relationship_entities.get(&id)
    }

    pub fn is_relationship_entity_known(&self, id: RelationshipId) -> bool {
        self.relationship_entities.contains(&id)
    }

    /// Register a persisted relationship entity. Same binding rules as
    /// [`add_node_entity`](Self::add_node_entity).
    pub fn add_relationship_entity(
        &self,
        entity: EntityHandle,
    ) -> Result<EntityHandle, ContextError> {
        let id = {
            let e = entity.read();
            self.relationship_schema(&e.type_name)?;
            e.relationship_id()
                .ok_or_else(|| ContextError::MissingIdentity {
                    type_name: e.type_name.clone(),
                })?
        };

        if !self.relationship_entities.add(id, entity.clone()) {
            return Ok(self.relationship_entities.get(&id).unwrap_or(entity));
        }

        let e = entity.read();
        let key = EntityKey::Relationship(id);
        self.types.add(&self.schema, &e.type_name, key, entity.clone());
        self.memo.remember(key, &e);
        drop(e);
        Ok(entity)
    }

    pub fn replace_relationship_entity(
        &self,
        entity: EntityHandle,
    ) -> Result<EntityHandle, ContextError> {
        let id = entity.read().relationship_id();
        if let Some(id) = id {
            self.remove_relationship_entity(id);
        }
        self.add_relationship_entity(entity)
    }

    /// Deregister a relationship entity and the facts carrying its id.
    pub fn remove_relationship_entity(&self, id: RelationshipId) -> Option<EntityHandle> {
        let entity = self.relationship_entities.remove(&id)?;
        let key = EntityKey::Relationship(id);
        self.types
            .remove(&self.schema, &entity.read().type_name, key);
        self.memo.forget(key);
        for fact in self.relationships.with_entity_id(id) {
            self.relationships.remove(&fact);
        }
        Some(entity)
    }

    // ── Mapped Relationships ─────────────────────────────────────

    /// Record a relationship fact. A relationship-entity id is only kept if
    /// that relationship entity is registered.
    pub fn add_relationship(&self, mut relationship: MappedRelationship) -> bool {
        if let Some(id) = relationship.relationship_entity_id {
            if !self.relationship_entities.contains(&id) {
                relationship.relationship_entity_id = None;
            }
        }
        self.relationships.add(relationship)
    }

    pub fn remove_relationship(&self, relationship: &MappedRelationship) -> bool {
        self.relationships.remove(relationship)
    }

    pub fn contains_relationship(&self, relationship: &MappedRelationship) -> bool {
        self.relationships.contains(relationship)
    }

    pub fn relationships(&self) -> Vec<MappedRelationship> {
        self.relationships.snapshot()
    }

    pub fn relationships_of(&self, node: NodeId) -> Vec<MappedRelationship> {
        self.relationships.touching(node)
    }

    // ── Labels ───────────────────────────────────────────────────

    pub fn label_history(&self, id: NodeId) -> LabelHistory {
        self.label_history.get(id)
    }

    pub fn record_labels(&self, id: NodeId, labels: BTreeSet<String>) {
        self.label_history.push(id, labels);
    }

    // ── Dirty Tracking ───────────────────────────────────────────

    /// New entities are always dirty; registered ones are dirty when their
    /// snapshot differs from the one remembered at registration or last save.
    pub fn is_dirty(&self, entity: &Entity) -> Result<bool, ContextError> {
        match self.key_of(entity)? {
            Some(key) => Ok(!self.memo.remembered(key, entity)),
            None => Ok(true),
        }
    }

    /// Properties that changed since `entity` was last remembered; all of
    /// them for entities the context has no snapshot of.
    pub fn property_delta(&self, entity: &Entity) -> Result<Properties, ContextError> {
        match self.key_of(entity)? {
            Some(key) => Ok(self.memo.delta(key, entity)),
            None => Ok(entity.properties.clone()),
        }
    }

    /// Mark `entity` as matching what was just flushed to the store. A node
    /// whose primary-index value changed is re-indexed under the new value.
    pub fn remember(&self, entity: &Entity) -> Result<(), ContextError> {
        let key = self
            .key_of(entity)?
            .ok_or_else(|| ContextError::MissingIdentity {
                type_name: entity.type_name.clone(),
            })?;
        if let EntityKey::Node(id) = key {
            self.reindex(id, entity);
        }
        self.memo.remember(key, entity);
        Ok(())
    }

    // ── Typed Retrieval ──────────────────────────────────────────

    /// Every registered entity satisfying `type_name`, including subtypes
    /// and implementors.
    pub fn get_entities(&self, type_name: &str) -> Vec<EntityHandle> {
        self.types.get(type_name)
    }

    /// Purge every registered entity of `type_name` (and its implementors).
    pub fn remove_type(&self, type_name: &str) -> Result<(), ContextError> {
        let schema = self.schema.get(type_name)?;
        let names = if schema.interface {
            self.schema.implementors(type_name)
        } else {
            vec![type_name.to_string()]
        };

        for name in &names {
            for key in self.types.keys(name) {
                self.purge(key);
            }
            self.types.delete(name);
        }
        tracing::debug!(type_name, "Type purged from mapping context");
        Ok(())
    }

    // ── Eviction ─────────────────────────────────────────────────

    /// Remove all information about the node entity with this id.
    pub fn detach_node_entity(&self, id: NodeId) -> bool {
        self.remove_node_entity(id).is_some()
    }

    /// Remove all information about the relationship entity with this id.
    pub fn detach_relationship_entity(&self, id: RelationshipId) -> bool {
        self.remove_relationship_entity(id).is_some()
    }

    /// Remove all information about `entity`, keyed by its current id.
    pub fn remove_entity(&self, entity: &Entity) -> Result<(), ContextError> {
        if let Some(key) = self.key_of(entity)? {
            self.purge(key);
        }
        Ok(())
    }

    /// Evict an entity after a rollback. Entities that received their id
    /// inside the rolled-back transaction also lose that id, since the
    /// database discarded it.
    pub fn reset(&self, tracked: &TrackedEntity) -> Result<(), ContextError> {
        let snapshot = tracked.handle.read().clone();
        self.remove_entity(&snapshot)?;
        if tracked.created {
            tracked.handle.write().id = None;
        }
        tracing::debug!(
            type_name = %snapshot.type_name,
            id = ?snapshot.id,
            created = tracked.created,
            "Entity reset after rollback"
        );
        Ok(())
    }

    /// Undo a relationship fact after a rollback. A recorded fact is
    /// dropped. A removed fact still exists in the database, so both of its
    /// endpoints are evicted and their relationships are read afresh on the
    /// next load.
    pub fn reset_relationship(&self, tracked: &TrackedRelationship) {
        let fact = &tracked.fact;
        self.relationships.remove(fact);
        if !tracked.added {
            self.remove_node_entity(fact.start_node_id);
            self.remove_node_entity(fact.end_node_id);
        }
        tracing::debug!(
            start = %fact.start_node_id,
            end = %fact.end_node_id,
            relationship_type = %fact.relationship_type,
            added = tracked.added,
            "Relationship reset after rollback"
        );
    }

    /// Entities directly connected to the node `id` by a known relationship.
    pub fn neighbours(&self, id: NodeId) -> Vec<EntityHandle> {
        self.relationships
            .touching(id)
            .into_iter()
            .filter_map(|r| {
                let other = if r.start_node_id == id {
                    r.end_node_id
                } else {
                    r.start_node_id
                };
                self.node_entities.get(&other)
            })
            .collect()
    }

    pub fn clear(&self) {
        self.memo.clear();
        self.relationships.clear();
        self.node_entities.clear();
        self.primary_index_entities.clear();
        self.types.clear();
        self.relationship_entities.clear();
        self.label_history.clear();
        tracing::debug!("Mapping context cleared");
    }

    pub fn node_count(&self) -> usize {
        self.node_entities.len()
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn key_of(&self, entity: &Entity) -> Result<Option<EntityKey>, ContextError> {
        let schema = self.schema.get(&entity.type_name)?;
        Ok(entity.id.map(|id| {
            if schema.is_relationship_entity() {
                EntityKey::Relationship(RelationshipId(id))
            } else {
                EntityKey::Node(NodeId(id))
            }
        }))
    }

    fn purge(&self, key: EntityKey) {
        match key {
            EntityKey::Node(id) => {
                self.remove_node_entity(id);
            }
            EntityKey::Relationship(id) => {
                self.remove_relationship_entity(id);
            }
        }
    }

    fn unindex_node(&self, entity: &Entity, id: NodeId) {
        let key = EntityKey::Node(id);
        self.types.remove(&self.schema, &entity.type_name, key);
        if let Some(index_key) = self.indexed_key(&entity.type_name, id) {
            self.primary_index_entities.remove(&index_key);
        }
        self.memo.forget(key);
    }

    /// The primary-index key the node `id` is registered under, read from
    /// the remembered snapshot rather than the possibly modified entity.
    fn indexed_key(&self, type_name: &str, id: NodeId) -> Option<PrimaryIndexKey> {
        let schema = self.schema.get(type_name).ok()?;
        let field = schema.primary_index.as_deref()?;
        let value = self.memo.remembered_property(EntityKey::Node(id), field)?;
        Some((schema.name.clone(), IndexValue::of(&value)?))
    }

    fn reindex(&self, id: NodeId, entity: &Entity) {
        let Ok(schema) = self.schema.get(&entity.type_name) else {
            return;
        };
        let Some(handle) = self.node_entities.get(&id) else {
            return;
        };
        let previous = self.indexed_key(&entity.type_name, id);
        let current = primary_index_key(schema, entity);
        if previous == current {
            return;
        }

        if let Some(old) = previous {
            let bound_here = self
                .primary_index_entities
                .get(&old)
                .is_some_and(|h| Arc::ptr_eq(&h, &handle));
            if bound_here {
                self.primary_index_entities.remove(&old);
            }
        }
        if let Some(new) = current {
            self.primary_index_entities.add(new, handle);
        }
        tracing::trace!(id = %id, type_name = %entity.type_name, "Primary index updated");
    }

    fn node_schema(&self, type_name: &str) -> Result<&EntitySchema, ContextError> {
        let schema = self.schema.get(type_name)?;
        if schema.is_relationship_entity() {
            return Err(ContextError::WrongKind {
                type_name: type_name.to_string(),
                expected: "node",
            });
        }
        Ok(schema)
    }

    fn relationship_schema(&self, type_name: &str) -> Result<&EntitySchema, ContextError> {
        let schema = self.schema.get(type_name)?;
        if !schema.is_relationship_entity() {
            return Err(ContextError::WrongKind {
                type_name: type_name.to_string(),
                expected: "relationship",
            });
        }
        Ok(schema)
    }
}

fn primary_index_key(schema: &EntitySchema, entity: &Entity) -> Option<PrimaryIndexKey> {
    let value = entity.property(schema.primary_index.as_deref()?)?;
    Some((schema.name.clone(), IndexValue::of(value)?))
}
