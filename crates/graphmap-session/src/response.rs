//! Applies a statement's result to the mapping context.
//!
//! Nothing is registered before the database confirms the write. Every
//! entity written and every relationship fact recorded or removed is
//! reported to `track`, so a later rollback can undo it.

use std::sync::Arc;

use graphmap_context::{EntityHandle, MappingContext};
use graphmap_core::{MappedRelationship, Value};
use graphmap_cypher::VarRef;

use crate::driver::Row;
use crate::error::{DriverError, Result, SessionError};
use crate::mapper::CompileContext;

/// A change `apply` made to the mapping context.
#[derive(Debug, Clone)]
pub(crate) enum Written {
    /// An entity was registered; `true` if it received its id here.
    Entity(EntityHandle, bool),
    /// A fact was recorded (`true`) or removed (`false`).
    Relationship(MappedRelationship, bool),
}

/// Feed the rows returned for `compiled` back into `context`.
pub(crate) fn apply<F>(
    context: &MappingContext,
    compiled: CompileContext,
    rows: &[Row],
    mut track: F,
) -> Result<()>
where
    F: FnMut(Written),
{
    let Some(statement) = compiled.statement() else {
        return Ok(());
    };
    let row = rows.first();

    if statement.expects_row() && row.is_none() {
        if statement.is_version_checked() {
            return Err(optimistic_locking_failure(&compiled, &mut track));
        }
        return Err(SessionError::ResultProcessing(DriverError::Rejected(
            "statement returned no row".to_string(),
        )));
    }

    for node in &compiled.new_nodes {
        let id = returned_id(row, &node.reference)?;
        {
            let mut e = node.handle.write();
            e.id = Some(id);
            if node.version.is_some() {
                e.version = node.version;
            }
        }
        context.add_node_entity(node.handle.clone())?;
        track(Written::Entity(node.handle.clone(), true));
    }

    for node in &compiled.updated_nodes {
        if node.version.is_some() {
            node.handle.write().version = node.version;
        }
        register_node(context, &node.handle)?;
        track(Written::Entity(node.handle.clone(), false));
    }

    for rel in &compiled.new_relationships {
        let mut fact = match (rel.start.read().node_id(), rel.end.read().node_id()) {
            (Some(start), Some(end)) => {
                MappedRelationship::new(start, rel.relationship_type.clone(), end)
            }
            _ => continue,
        };
        if let Some(entity) = &rel.entity {
            let id = returned_id(row, &rel.reference)?;
            {
                let mut e = entity.write();
                e.id = Some(id);
                if rel.version.is_some() {
                    e.version = rel.version;
                }
            }
            context.add_relationship_entity(entity.clone())?;
            track(Written::Entity(entity.clone(), true));
            if let Some(rid) = entity.read().relationship_id() {
                fact = fact.with_entity_id(rid);
            }
        }
        record(context, fact, &mut track);
    }

    for rel in &compiled.updated_relationships {
        if rel.version.is_some() {
            rel.handle.write().version = rel.version;
        }
        register_relationship_entity(context, &rel.handle)?;
        track(Written::Entity(rel.handle.clone(), false));
    }

    for (fact, entity) in &compiled.known_facts {
        context.add_relationship_entity(entity.clone())?;
        record(context, fact.clone(), &mut track);
    }

    for fact in &compiled.deleted {
        if context.remove_relationship(fact) {
            track(Written::Relationship(fact.clone(), false));
        }
        if let Some(id) = fact.relationship_entity_id {
            context.detach_relationship_entity(id);
        }
    }

    tracing::debug!(
        created = compiled.new_nodes.len(),
        updated = compiled.updated_nodes.len(),
        related = compiled.new_relationships.len(),
        unrelated = compiled.deleted.len(),
        "Response applied"
    );
    Ok(())
}

fn record<F>(context: &MappingContext, fact: MappedRelationship, track: &mut F)
where
    F: FnMut(Written),
{
    if context.add_relationship(fact.clone()) {
        track(Written::Relationship(fact, true));
    }
}

/// Remember a saved node, rebinding its id if the register holds a
/// different handle for it.
fn register_node(context: &MappingContext, handle: &EntityHandle) -> Result<()> {
    let Some(id) = handle.read().node_id() else {
        return Ok(());
    };
    match context.get_node_entity(id) {
        Some(resident) if Arc::ptr_eq(&resident, handle) => {
            let e = handle.read();
            context.remember(&e)?;
            context.record_labels(id, e.labels.clone());
        }
        _ => {
            context.replace_node_entity(handle.clone())?;
        }
    }
    Ok(())
}

fn register_relationship_entity(context: &MappingContext, handle: &EntityHandle) -> Result<()> {
    let Some(id) = handle.read().relationship_id() else {
        return Ok(());
    };
    match context.get_relationship_entity(id) {
        Some(resident) if Arc::ptr_eq(&resident, handle) => {
            context.remember(&handle.read())?;
        }
        _ => {
            context.replace_relationship_entity(handle.clone())?;
        }
    }
    Ok(())
}

/// The version-checked match found nothing: someone else wrote the entity
/// first. The stale entity is tracked so the rollback evicts it.
fn optimistic_locking_failure<F>(compiled: &CompileContext, track: &mut F) -> SessionError
where
    F: FnMut(Written),
{
    let checked = compiled
        .updated_nodes
        .iter()
        .filter_map(|n| n.checked.map(|v| (&n.handle, v)))
        .chain(
            compiled
                .updated_relationships
                .iter()
                .filter_map(|r| r.checked.map(|v| (&r.handle, v))),
        )
        .collect::<Vec<_>>();

    for (handle, _) in &checked {
        track(Written::Entity((*handle).clone(), false));
    }

    match checked.first() {
        Some((handle, version)) => {
            let e = handle.read();
            tracing::warn!(
                type_name = %e.type_name,
                id = ?e.id,
                version,
                "Optimistic locking conflict"
            );
            SessionError::OptimisticLocking {
                type_name: e.type_name.clone(),
                id: e.id.unwrap_or_default(),
                version: *version,
            }
        }
        None => SessionError::ResultProcessing(DriverError::Rejected(
            "version-checked statement returned no row".to_string(),
        )),
    }
}

fn returned_id(row: Option<&Row>, reference: &VarRef) -> Result<i64> {
    row.and_then(|r| r.get(reference.as_str()))
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            SessionError::ResultProcessing(DriverError::Decode {
                column: reference.to_string(),
                message: "no id returned".to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use graphmap_context::handle;
    use graphmap_core::{Entity, NodeId, Schema, TypeDescription};

    use super::*;
    use crate::graph::ObjectGraph;
    use crate::mapper::EntityGraphMapper;

    fn context() -> MappingContext {
        let schema = Schema::new(vec![TypeDescription::node("Person").version("version")]).unwrap();
        MappingContext::new(Arc::new(schema))
    }

    fn row(pairs: &[(&str, i64)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_new_nodes_receive_ids_and_are_registered() {
        let ctx = context();
        let mut graph = ObjectGraph::new();
        let (a, ha) = graph.add_entity(Entity::new("Person"));
        let (b, hb) = graph.add_entity(Entity::new("Person"));
        graph.relate(a, "KNOWS", b);

        let compiled = EntityGraphMapper::new(&ctx, 0).map(&graph).unwrap();
        let mut tracked = Vec::new();
        apply(&ctx, compiled, &[row(&[("_0", 10), ("_1", 11)])], |w| {
            tracked.push(w)
        })
        .unwrap();

        assert_eq!(ha.read().id, Some(10));
        assert_eq!(hb.read().id, Some(11));
        assert_eq!(ha.read().version, Some(0));
        assert!(ctx.is_known(NodeId(10)));
        assert!(ctx.contains_relationship(&MappedRelationship::new(
            NodeId(10),
            "KNOWS",
            NodeId(11)
        )));
        assert_eq!(tracked.len(), 3);
        assert!(tracked.iter().all(|w| matches!(
            w,
            Written::Entity(_, true) | Written::Relationship(_, true)
        )));
    }

    #[test]
    fn test_missing_row_on_version_check_is_optimistic_locking() {
        let ctx = context();
        let mut e = Entity::new("Person").with_property("name", "a");
        e.id = Some(1);
        e.version = Some(4);
        let person = ctx.add_node_entity(handle(e)).unwrap();
        person.write().set_property("name", "b");

        let compiled = EntityGraphMapper::new(&ctx, 0)
            .map(&ObjectGraph::single(person.clone()))
            .unwrap();
        let mut tracked = Vec::new();
        let err = apply(&ctx, compiled, &[], |w| tracked.push(w)).unwrap_err();

        assert!(err.is_optimistic_locking());
        assert!(matches!(err, SessionError::OptimisticLocking { id: 1, version: 4, .. }));
        assert_eq!(person.read().version, Some(4));
        assert_eq!(tracked.len(), 1);
        assert!(matches!(&tracked[0], Written::Entity(h, false) if Arc::ptr_eq(h, &person)));
    }

    #[test]
    fn test_removed_facts_are_tracked() {
        let schema = Schema::new(vec![TypeDescription::node("Person").relationship_field(
            "friends",
            "KNOWS",
            graphmap_core::Direction::Outgoing,
            "Person",
        )])
        .unwrap();
        let ctx = MappingContext::new(Arc::new(schema));
        let mut e = Entity::new("Person");
        e.id = Some(1);
        let person = ctx.add_node_entity(handle(e)).unwrap();
        let fact = MappedRelationship::new(NodeId(1), "KNOWS", NodeId(2));
        ctx.add_relationship(fact.clone());

        let compiled = EntityGraphMapper::new(&ctx, 0)
            .map(&ObjectGraph::single(person))
            .unwrap();
        let mut tracked = Vec::new();
        apply(&ctx, compiled, &[], |w| tracked.push(w)).unwrap();

        assert!(!ctx.contains_relationship(&fact));
        assert_eq!(tracked.len(), 1);
        assert!(matches!(&tracked[0], Written::Relationship(f, false) if *f == fact));
    }

    #[test]
    fn test_missing_row_without_version_check_is_result_processing() {
        let ctx = context();
        let compiled = EntityGraphMapper::new(&ctx, 0)
            .map(&ObjectGraph::single(handle(Entity::new("Person"))))
            .unwrap();
        let err = apply(&ctx, compiled, &[], |_| {}).unwrap_err();
        assert!(matches!(err, SessionError::ResultProcessing(_)));
        assert_eq!(ctx.node_count(), 0);
    }
}
