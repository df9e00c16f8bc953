//! The unit of work users interact with.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use graphmap_context::{handle, EntityHandle, MappingContext, TrackedWrites};
use graphmap_core::config::SessionSettings;
use graphmap_core::events::{EventKind, EventListener, PersistenceEvent};
use graphmap_core::{
    Entity, EntitySchema, MappedRelationship, NodeId, Properties, RelationshipId, Schema,
    TransactionType, Value,
};
use graphmap_cypher::node::escape;
use parking_lot::RwLock;

use crate::driver::{Driver, Query, Row};
use crate::error::{Result, SessionError};
use crate::graph::ObjectGraph;
use crate::mapper::EntityGraphMapper;
use crate::response::{self, Written};
use crate::transaction::{Transaction, TransactionManager};

type SessionTransaction<D> = Arc<Transaction<<D as Driver>::Transaction>>;

/// One mapping context and one transaction manager over a driver.
///
/// `save`, `load` and `delete` each run in a transaction of their own. The
/// `_in` variants take the caller's transaction handle and extend it, so a
/// transaction is only ever joined by the call chain holding its handle.
pub struct Session<D: Driver> {
    context: MappingContext,
    transactions: TransactionManager<D>,
    settings: SessionSettings,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl<D: Driver> Session<D> {
    pub fn new(driver: Arc<D>, schema: Arc<Schema>, settings: SessionSettings) -> Self {
        Self {
            context: MappingContext::new(schema),
            transactions: TransactionManager::new(driver, settings.default_transaction_type),
            settings,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &MappingContext {
        &self.context
    }

    pub fn transaction_manager(&self) -> &TransactionManager<D> {
        &self.transactions
    }

    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Forget everything the session has read or written.
    pub fn clear(&self) {
        self.context.clear();
    }

    // ── Transactions ─────────────────────────────────────────────

    /// Open a transaction for the caller to drive. Pass the handle to the
    /// `_in` operations to run them inside it.
    pub async fn begin_transaction(
        &self,
        transaction_type: Option<TransactionType>,
    ) -> Result<SessionTransaction<D>> {
        Ok(self.transactions.open(None, transaction_type, &[]).await?)
    }

    /// Extend `parent` with a nested scope that must itself be committed or
    /// rolled back, then closed.
    pub async fn begin_nested(
        &self,
        parent: &SessionTransaction<D>,
        transaction_type: Option<TransactionType>,
    ) -> Result<SessionTransaction<D>> {
        Ok(self
            .transactions
            .open(Some(parent), transaction_type, &[])
            .await?)
    }

    pub async fn commit(&self, tx: &SessionTransaction<D>) -> Result<()> {
        Ok(self.transactions.commit(tx).await?)
    }

    pub async fn rollback(&self, tx: &SessionTransaction<D>) -> Result<()> {
        Ok(self.transactions.rollback(tx).await?)
    }

    /// Close a caller-driven transaction. If it ends rolled back, everything
    /// written inside it is evicted.
    pub async fn close(&self, tx: &SessionTransaction<D>) -> Result<()> {
        Ok(self
            .transactions
            .close(tx, |tracked| self.evict(tracked))
            .await?)
    }

    // ── Save ─────────────────────────────────────────────────────

    /// Persist every change `graph` makes relative to what the session
    /// remembers, in one statement.
    pub async fn save(&self, graph: &ObjectGraph) -> Result<()> {
        self.save_within(None, graph).await
    }

    /// [`save`](Self::save) inside the caller's transaction.
    pub async fn save_in(
        &self,
        tx: &SessionTransaction<D>,
        graph: &ObjectGraph,
    ) -> Result<()> {
        self.save_within(Some(tx), graph).await
    }

    /// Persist a single entity.
    pub async fn save_entity(&self, entity: &EntityHandle) -> Result<()> {
        self.save(&ObjectGraph::single(entity.clone())).await
    }

    async fn save_within(
        &self,
        parent: Option<&SessionTransaction<D>>,
        graph: &ObjectGraph,
    ) -> Result<()> {
        for (_, h) in graph.nodes() {
            self.fire(EventKind::PreSave, &h.read());
        }

        self.in_transaction(parent, Some(TransactionType::ReadWrite), |tx| async move {
            let compiled =
                EntityGraphMapper::new(&self.context, self.settings.version_initial_value)
                    .map(graph)?;
            let Some(statement) = compiled.statement() else {
                tracing::debug!("Nothing to save");
                return Ok(());
            };
            let rows = tx.execute(&Query::from(statement)).await?;
            response::apply(&self.context, compiled, &rows, |written| match written {
                Written::Entity(h, created) => tx.track(h, created),
                Written::Relationship(fact, added) => tx.track_relationship(fact, added),
            })
        })
        .await?;

        for (_, h) in graph.nodes() {
            self.fire(EventKind::PostSave, &h.read());
        }
        Ok(())
    }

    // ── Load ─────────────────────────────────────────────────────

    /// The node entity with database id `id`.
    ///
    /// A resident entity is returned as-is, without touching the database.
    /// Otherwise the node and its relationships are fetched and registered.
    pub async fn load(&self, type_name: &str, id: i64) -> Result<EntityHandle> {
        self.load_within(None, type_name, id).await
    }

    /// [`load`](Self::load) inside the caller's transaction.
    pub async fn load_in(
        &self,
        tx: &SessionTransaction<D>,
        type_name: &str,
        id: i64,
    ) -> Result<EntityHandle> {
        self.load_within(Some(tx), type_name, id).await
    }

    async fn load_within(
        &self,
        parent: Option<&SessionTransaction<D>>,
        type_name: &str,
        id: i64,
    ) -> Result<EntityHandle> {
        if let Some(resident) = self.context.get_node_entity(NodeId(id)) {
            return Ok(resident);
        }
        self.context.schema().get(type_name)?;

        let (node, relationships) = self
            .in_transaction(parent, None, |tx| async move {
                let node = tx
                    .execute(
                        &Query::new(
                            "MATCH (n) WHERE ID(n) = $id \
                             RETURN ID(n) AS id, labels(n) AS labels, properties(n) AS properties",
                        )
                        .param("id", id)
                        .columns(&["id", "labels", "properties"]),
                    )
                    .await?;
                let relationships = tx
                    .execute(
                        &Query::new(
                            "MATCH (n)-[r]-() WHERE ID(n) = $id \
                             RETURN ID(startNode(r)) AS start, type(r) AS type, ID(endNode(r)) AS end, \
                             ID(r) AS rid, properties(r) AS properties",
                        )
                        .param("id", id)
                        .columns(&["start", "type", "end", "rid", "properties"]),
                    )
                    .await?;
                Ok::<_, SessionError>((node, relationships))
            })
            .await?;

        let Some(row) = node.first() else {
            return Err(SessionError::NotFound {
                type_name: type_name.to_string(),
                id,
            });
        };
        let entity = self.entity_from_row(type_name, id, row)?;
        let loaded = self.context.add_node_entity(handle(entity))?;

        for r in &relationships {
            if let Some(fact) = self.relationship_from_row(r)? {
                self.context.add_relationship(fact);
            }
        }
        tracing::debug!(id, type_name, relationships = relationships.len(), "Entity loaded");
        Ok(loaded)
    }

    fn entity_from_row(&self, type_name: &str, id: i64, row: &Row) -> Result<Entity> {
        let schema = self.context.schema();
        let labels: Vec<String> = row
            .get("labels")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|l| l.as_str().map(str::to_string))
            .collect();

        // Prefer the most specific type the stored labels describe.
        let resolved = schema
            .resolve_node_type(labels.iter().map(String::as_str))
            .map(|s| s.name.clone())
            .filter(|name| {
                name == type_name || schema.ancestors(name).iter().any(|a| a == type_name)
            })
            .unwrap_or_else(|| type_name.to_string());
        let entity_schema = schema.get(&resolved)?;
        let static_labels = schema.labels_for(&resolved)?;

        let mut entity = entity_with_properties(entity_schema, id, row);
        entity.labels = labels
            .into_iter()
            .filter(|l| !static_labels.contains(l))
            .collect::<BTreeSet<_>>();
        Ok(entity)
    }

    /// A relationship fact read by `load`. Relationships persisted for a
    /// relationship-entity type register that entity and carry its id, so
    /// several of them between the same two nodes stay distinct.
    fn relationship_from_row(&self, row: &Row) -> Result<Option<MappedRelationship>> {
        let start = row.get("start").and_then(Value::as_i64);
        let end = row.get("end").and_then(Value::as_i64);
        let relationship_type = row.get("type").and_then(Value::as_str);
        let (Some(start), Some(end), Some(relationship_type)) = (start, end, relationship_type)
        else {
            return Ok(None);
        };
        let fact = MappedRelationship::new(NodeId(start), relationship_type, NodeId(end));

        let schema = self.context.schema();
        let rid = row.get("rid").and_then(Value::as_i64);
        let (Some(entity_schema), Some(rid)) =
            (schema.resolve_relationship_type(relationship_type), rid)
        else {
            return Ok(Some(fact));
        };
        self.context
            .add_relationship_entity(handle(entity_with_properties(entity_schema, rid, row)))?;
        Ok(Some(fact.with_entity_id(RelationshipId(rid))))
    }

    // ── Delete ───────────────────────────────────────────────────

    /// Delete an entity and everything attached to it. Versioned entities
    /// are only deleted if the stored version still matches.
    pub async fn delete(&self, entity: &EntityHandle) -> Result<()> {
        self.delete_within(None, entity).await
    }

    /// [`delete`](Self::delete) inside the caller's transaction.
    pub async fn delete_in(
        &self,
        tx: &SessionTransaction<D>,
        entity: &EntityHandle,
    ) -> Result<()> {
        self.delete_within(Some(tx), entity).await
    }

    async fn delete_within(
        &self,
        parent: Option<&SessionTransaction<D>>,
        entity: &EntityHandle,
    ) -> Result<()> {
        let snapshot = entity.read().clone();
        let Some(id) = snapshot.id else {
            tracing::debug!(type_name = %snapshot.type_name, "Delete of unsaved entity ignored");
            return Ok(());
        };
        let schema = self.context.schema().get(&snapshot.type_name)?;

        let checked = schema.version_field.as_deref().zip(snapshot.version);
        let mut cypher = if schema.is_relationship_entity() {
            "MATCH ()-[n]->() WHERE ID(n) = $id".to_string()
        } else {
            "MATCH (n) WHERE ID(n) = $id".to_string()
        };
        if let Some((field, _)) = checked {
            cypher.push_str(&format!(" AND n.{} = $version", escape(field)));
        }
        cypher.push_str(if schema.is_relationship_entity() {
            " WITH n, ID(n) AS id DELETE n RETURN id"
        } else {
            " WITH n, ID(n) AS id DETACH DELETE n RETURN id"
        });
        let mut query = Query::new(cypher).param("id", id).columns(&["id"]);
        if let Some((_, version)) = checked {
            query = query.param("version", version);
        }
        let checked = checked.map(|(_, version)| version);

        self.fire(EventKind::PreDelete, &snapshot);
        self.in_transaction(parent, Some(TransactionType::ReadWrite), |tx| {
            let query = &query;
            let entity = entity.clone();
            let type_name = snapshot.type_name.clone();
            async move {
                let rows = tx.execute(query).await?;
                if !rows.is_empty() {
                    return Ok(());
                }
                tx.track(entity, false);
                Err(match checked {
                    Some(version) => {
                        tracing::warn!(
                            %type_name,
                            id,
                            version,
                            "Optimistic locking conflict on delete"
                        );
                        SessionError::OptimisticLocking {
                            type_name,
                            id,
                            version,
                        }
                    }
                    None => SessionError::NotFound { type_name, id },
                })
            }
        })
        .await?;

        self.context.remove_entity(&snapshot)?;
        entity.write().id = None;
        self.fire(EventKind::PostDelete, &snapshot);
        tracing::debug!(type_name = %snapshot.type_name, id, "Entity deleted");
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Run `work` in a transaction scope, extending `parent` if given:
    /// commit on success, roll back on failure, and always close.
    async fn in_transaction<F, Fut, T>(
        &self,
        parent: Option<&SessionTransaction<D>>,
        transaction_type: Option<TransactionType>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(SessionTransaction<D>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self
            .transactions
            .open(parent, transaction_type, &[])
            .await?;
        let outcome = work(tx.clone()).await;
        let settled = match &outcome {
            Ok(_) => self.transactions.commit(&tx).await,
            Err(_) => self.transactions.rollback(&tx).await,
        };
        let closed = self
            .transactions
            .close(&tx, |tracked| self.evict(tracked))
            .await;

        let value = outcome?;
        settled?;
        closed?;
        Ok(value)
    }

    fn evict(&self, tracked: TrackedWrites) {
        if tracked.is_empty() {
            return;
        }
        for entity in &tracked.entities {
            if let Err(e) = self.context.reset(entity) {
                tracing::warn!(error = %e, "Failed to evict entity after rollback");
            }
        }
        for relationship in &tracked.relationships {
            self.context.reset_relationship(relationship);
        }
        tracing::debug!(
            entities = tracked.entities.len(),
            relationships = tracked.relationships.len(),
            "Rolled-back writes evicted"
        );
    }

    fn fire(&self, kind: EventKind, entity: &Entity) {
        let listeners = self.listeners.read();
        if listeners.is_empty() {
            return;
        }
        let event = PersistenceEvent::new(kind, &entity.type_name, entity.id);
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }
}

/// An entity of `schema` with database id `id`, built from the
/// `properties` column of `row`. The version property becomes the entity's
/// version.
fn entity_with_properties(schema: &EntitySchema, id: i64, row: &Row) -> Entity {
    let mut properties: Properties = row
        .get("properties")
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default();
    let version = schema
        .version_field
        .as_deref()
        .and_then(|field| properties.remove(field))
        .and_then(|v| v.as_i64());

    let mut entity = Entity::new(schema.name.clone());
    entity.id = Some(id);
    entity.version = version;
    entity.properties = properties;
    entity
}
