//! Graph walk: turns an [`ObjectGraph`] into compiler events and remembers
//! what each variable reference stands for, so the response can be fed back
//! into the mapping context.

use std::collections::{HashMap, HashSet};

use graphmap_context::{EntityHandle, MappingContext};
use graphmap_core::{
    Direction, Entity, EntitySchema, MappedRelationship, NodeId, Properties, Value,
};
use graphmap_cypher::{Compiler, Statement, VarRef};

use crate::error::Result;
use crate::graph::{NodeIndex, ObjectGraph};

// ── Compile Context ──────────────────────────────────────────────

/// A node written by the statement.
#[derive(Debug, Clone)]
pub(crate) struct PendingNode {
    pub reference: VarRef,
    pub handle: EntityHandle,
    /// Version the entity carries once the write succeeds.
    pub version: Option<i64>,
    /// Version the stored node was matched against, if any.
    pub checked: Option<i64>,
}

/// A relationship created by the statement.
#[derive(Debug, Clone)]
pub(crate) struct PendingRelationship {
    pub reference: VarRef,
    pub start: EntityHandle,
    pub end: EntityHandle,
    pub relationship_type: String,
    pub entity: Option<EntityHandle>,
    pub version: Option<i64>,
}

/// A relationship entity updated in place.
#[derive(Debug, Clone)]
pub(crate) struct PendingUpdate {
    pub reference: VarRef,
    pub handle: EntityHandle,
    pub version: Option<i64>,
    pub checked: Option<i64>,
}

/// The compiled statement plus everything needed to apply its result.
#[derive(Debug, Default)]
pub struct CompileContext {
    statement: Option<Statement>,
    pub(crate) new_nodes: Vec<PendingNode>,
    pub(crate) updated_nodes: Vec<PendingNode>,
    pub(crate) new_relationships: Vec<PendingRelationship>,
    pub(crate) updated_relationships: Vec<PendingUpdate>,
    /// Facts whose relationship entity already exists but that the context
    /// does not know about yet, with the entity carrying them.
    pub(crate) known_facts: Vec<(MappedRelationship, EntityHandle)>,
    pub(crate) deleted: Vec<MappedRelationship>,
}

impl CompileContext {
    /// `None` when the graph matches what the context remembers.
    pub fn statement(&self) -> Option<&Statement> {
        self.statement.as_ref()
    }

    pub fn into_statement(self) -> Option<Statement> {
        self.statement
    }

    pub fn has_changes(&self) -> bool {
        self.statement.is_some()
    }
}

// ── Mapper ───────────────────────────────────────────────────────

/// Walks one object graph against a mapping context.
pub struct EntityGraphMapper<'a> {
    context: &'a MappingContext,
    version_initial_value: i64,
}

impl<'a> EntityGraphMapper<'a> {
    pub fn new(context: &'a MappingContext, version_initial_value: i64) -> Self {
        Self {
            context,
            version_initial_value,
        }
    }

    /// Compile the changes `graph` makes relative to the context.
    pub fn map(&self, graph: &ObjectGraph) -> Result<CompileContext> {
        let mut compiler = Compiler::new();
        let mut out = CompileContext::default();
        let mut refs: HashMap<NodeIndex, VarRef> = HashMap::new();
        let mut refs_by_id: HashMap<NodeId, VarRef> = HashMap::new();

        for (index, handle) in graph.nodes() {
            let r = self.map_node(&mut compiler, &mut out, handle)?;
            if let Some(id) = handle.read().node_id() {
                refs_by_id.insert(id, r.clone());
            }
            refs.insert(index, r);
        }

        let mut present = HashSet::new();
        for edge in graph.edges() {
            let (Some(start), Some(end)) = (graph.node(edge.start), graph.node(edge.end)) else {
                continue;
            };
            let (start_ref, end_ref) = match (refs.get(&edge.start), refs.get(&edge.end)) {
                (Some(s), Some(e)) => (s.clone(), e.clone()),
                _ => continue,
            };
            let start_id = start.read().node_id();
            let end_id = end.read().node_id();

            let relationship_type = match &edge.entity {
                Some(entity) => {
                    let type_name = entity.read().type_name.clone();
                    self.context
                        .schema()
                        .get(&type_name)?
                        .relationship_type()
                        .unwrap_or(edge.relationship_type.as_str())
                        .to_string()
                }
                None => edge.relationship_type.clone(),
            };

            let fact = match (start_id, end_id) {
                (Some(s), Some(e)) => {
                    let mut fact = MappedRelationship::new(s, relationship_type.clone(), e);
                    if let Some(id) = edge.entity.as_ref().and_then(|h| h.read().relationship_id())
                    {
                        fact = fact.with_entity_id(id);
                    }
                    present.insert(fact.clone());
                    Some(fact)
                }
                _ => None,
            };

            match &edge.entity {
                Some(entity) if !entity.read().is_new() => {
                    self.map_existing_relationship(&mut compiler, &mut out, entity)?;
                    if let Some(fact) = fact.filter(|f| !self.context.contains_relationship(f)) {
                        out.known_facts.push((fact, entity.clone()));
                    }
                }
                Some(entity) => {
                    let e = entity.read();
                    let schema = self.context.schema().get(&e.type_name)?;
                    let version = self.initial_version(&e)?;
                    let r = compiler.relate(&start_ref, &relationship_type, &end_ref)?;
                    let builder = compiler.relationship(&r)?;
                    builder.as_entity()?;
                    builder.add_properties(writable(schema, &e.properties))?;
                    if let (Some(field), Some(v)) = (&schema.version_field, version) {
                        builder.add_property(field.clone(), v)?;
                    }
                    drop(e);
                    out.new_relationships.push(PendingRelationship {
                        reference: r,
                        start: start.clone(),
                        end: end.clone(),
                        relationship_type,
                        entity: Some(entity.clone()),
                        version,
                    });
                }
                None => {
                    if fact.as_ref().is_some_and(|f| self.context.contains_relationship(f)) {
                        continue;
                    }
                    let r = compiler.relate(&start_ref, &relationship_type, &end_ref)?;
                    out.new_relationships.push(PendingRelationship {
                        reference: r,
                        start: start.clone(),
                        end: end.clone(),
                        relationship_type,
                        entity: None,
                        version: None,
                    });
                }
            }
        }

        self.map_removals(&mut compiler, &mut out, graph, &present, &mut refs_by_id)?;

        out.statement = compiler.compile();
        Ok(out)
    }

    fn map_node(
        &self,
        compiler: &mut Compiler,
        out: &mut CompileContext,
        handle: &EntityHandle,
    ) -> Result<VarRef> {
        let e = handle.read();
        let schema = self.context.schema().get(&e.type_name)?;
        let mut labels = self.context.schema().labels_for(&e.type_name)?;
        let dynamic: Vec<String> = e
            .labels
            .iter()
            .filter(|l| !labels.contains(l))
            .cloned()
            .collect();
        labels.extend(dynamic);

        let Some(id) = e.node_id() else {
            let r = compiler.new_node(labels);
            let version = self.initial_version(&e)?;
            let node = compiler.node(&r)?;
            node.add_properties(writable(schema, &e.properties))?;
            if let (Some(field), Some(v)) = (&schema.version_field, version) {
                node.add_property(field.clone(), v)?;
            }
            tracing::trace!(reference = %r, type_name = %e.type_name, "New node");
            out.new_nodes.push(PendingNode {
                reference: r.clone(),
                handle: handle.clone(),
                version,
                checked: None,
            });
            return Ok(r);
        };

        let r = compiler.existing_node(id, labels);
        if !self.context.is_dirty(&e)? {
            return Ok(r);
        }

        let delta = self.context.property_delta(&e)?;
        let diff = self.context.label_history(id).diff(&e.labels);
        let (version, checked) = self.next_version(schema, &e);
        let node = compiler.node(&r)?;
        node.add_properties(writable(schema, &delta))?;
        node.label_changes(&diff.added, &diff.removed);
        if let Some(field) = &schema.version_field {
            if let Some(current) = checked {
                node.version_check(field.clone(), current)?;
            }
            if let Some(v) = version {
                node.add_property(field.clone(), v)?;
            }
        }
        tracing::trace!(reference = %r, id = %id, "Dirty node");
        out.updated_nodes.push(PendingNode {
            reference: r.clone(),
            handle: handle.clone(),
            version,
            checked,
        });
        Ok(r)
    }

    fn map_existing_relationship(
        &self,
        compiler: &mut Compiler,
        out: &mut CompileContext,
        entity: &EntityHandle,
    ) -> Result<()> {
        let e = entity.read();
        if !self.context.is_dirty(&e)? {
            return Ok(());
        }
        let Some(id) = e.relationship_id() else {
            return Ok(());
        };
        let schema = self.context.schema().get(&e.type_name)?;
        let relationship_type = schema.relationship_type().unwrap_or_default().to_string();
        let delta = self.context.property_delta(&e)?;
        let (version, checked) = self.next_version(schema, &e);

        let r = compiler.existing_relationship(id, &relationship_type);
        let builder = compiler.relationship(&r)?;
        builder.add_properties(writable(schema, &delta))?;
        if let Some(field) = &schema.version_field {
            if let Some(current) = checked {
                builder.version_check(field.clone(), current)?;
            }
            if let Some(v) = version {
                builder.add_property(field.clone(), v)?;
            }
        }
        out.updated_relationships.push(PendingUpdate {
            reference: r,
            handle: entity.clone(),
            version,
            checked,
        });
        Ok(())
    }

    /// Delete remembered relationships of persisted graph nodes that the
    /// graph no longer contains. Only relationship types the node's schema
    /// declares, in the declared direction, are considered.
    fn map_removals(
        &self,
        compiler: &mut Compiler,
        out: &mut CompileContext,
        graph: &ObjectGraph,
        present: &HashSet<MappedRelationship>,
        refs_by_id: &mut HashMap<NodeId, VarRef>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for (_, handle) in graph.nodes() {
            let (id, type_name) = {
                let e = handle.read();
                match e.node_id() {
                    Some(id) => (id, e.type_name.clone()),
                    None => continue,
                }
            };
            let declared = self.declared_relationships(&type_name)?;
            if declared.is_empty() {
                continue;
            }

            for fact in self.context.relationships_of(id) {
                let owned = (fact.start_node_id == id
                    && declared.contains(&(fact.relationship_type.clone(), Direction::Outgoing)))
                    || (fact.end_node_id == id
                        && declared
                            .contains(&(fact.relationship_type.clone(), Direction::Incoming)));
                if !owned || present.contains(&fact) || !seen.insert(fact.clone()) {
                    continue;
                }

                let start = self.reference_for(compiler, refs_by_id, fact.start_node_id)?;
                let end = self.reference_for(compiler, refs_by_id, fact.end_node_id)?;
                compiler.unrelate(
                    &start,
                    &fact.relationship_type,
                    &end,
                    fact.relationship_entity_id,
                )?;
                tracing::trace!(
                    start = %fact.start_node_id,
                    end = %fact.end_node_id,
                    relationship_type = %fact.relationship_type,
                    "Relationship removed"
                );
                out.deleted.push(fact);
            }
        }
        Ok(())
    }

    /// A variable for a persisted node, matching it by id if the graph did
    /// not already bind one.
    fn reference_for(
        &self,
        compiler: &mut Compiler,
        refs_by_id: &mut HashMap<NodeId, VarRef>,
        id: NodeId,
    ) -> Result<VarRef> {
        if let Some(r) = refs_by_id.get(&id) {
            return Ok(r.clone());
        }
        let labels = match self.context.get_node_entity(id) {
            Some(h) => self.context.schema().labels_for(&h.read().type_name)?,
            None => Vec::new(),
        };
        let r = compiler.existing_node(id, labels);
        refs_by_id.insert(id, r.clone());
        Ok(r)
    }

    fn declared_relationships(&self, type_name: &str) -> Result<HashSet<(String, Direction)>> {
        let schema = self.context.schema();
        let mut names = vec![type_name.to_string()];
        names.extend(schema.ancestors(type_name));
        let mut declared = HashSet::new();
        for name in names {
            for field in &schema.get(&name)?.relationships {
                declared.insert((field.relationship_type.clone(), field.direction));
            }
        }
        Ok(declared)
    }

    fn initial_version(&self, entity: &Entity) -> Result<Option<i64>> {
        let schema = self.context.schema().get(&entity.type_name)?;
        Ok(schema.is_versioned().then_some(self.version_initial_value))
    }

    /// `(version after save, version to check)` for a persisted entity.
    fn next_version(&self, schema: &EntitySchema, entity: &Entity) -> (Option<i64>, Option<i64>) {
        if !schema.is_versioned() {
            return (None, None);
        }
        match entity.version {
            Some(current) => (Some(current + 1), Some(current)),
            None => (Some(self.version_initial_value), None),
        }
    }
}

/// Properties the statement may write: identity and version fields are
/// managed by the mapper itself.
fn writable<'p>(
    schema: &'p EntitySchema,
    properties: &'p Properties,
) -> impl Iterator<Item = (String, Value)> + 'p {
    properties
        .iter()
        .filter(move |(k, _)| {
            **k != schema.identity_field && schema.version_field.as_deref() != Some(k.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
}
