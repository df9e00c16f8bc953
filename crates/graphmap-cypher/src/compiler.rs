//! Emission protocol: collects graph-walk events and renders them into one
//! statement.
//!
//! Fragments are always rendered in this order, so that every variable a
//! later clause mentions is already bound:
//!
//! 1. one `CREATE` for all new nodes
//! 2. `MATCH … SET … REMOVE …` per changed (or referenced) existing node
//! 3. one `CREATE` for all new relationships
//! 4. `MATCH … SET …` per changed relationship entity
//! 5. `OPTIONAL MATCH … DELETE` per removed relationship
//! 6. `RETURN ID(_n) AS _n` for every created entity and version-checked match

use std::collections::HashMap;

use graphmap_core::{NodeId, RelationshipId, Value};

use crate::error::{CompileError, Result};
use crate::identifiers::{IdentifierManager, VarRef};
use crate::node::NodeBuilder;
use crate::relationship::RelationshipBuilder;
use crate::statement::{Parameters, Statement};

// ── Statement Writer ─────────────────────────────────────────────

/// Shared buffer every builder renders into: clauses, parameters and the
/// variables currently in scope.
#[derive(Debug, Default)]
pub(crate) struct StatementWriter {
    clauses: Vec<String>,
    parameters: Parameters,
    scope: Vec<VarRef>,
}

impl StatementWriter {
    pub(crate) fn parameter(&mut self, key: String, value: Value) {
        self.parameters.insert(key, value);
    }

    /// Append a reading clause binding `binds`, carrying the current scope
    /// across with `WITH` when anything came before it.
    pub(crate) fn read_clause(&mut self, clause: String, binds: &VarRef) {
        if !self.clauses.is_empty() && !self.scope.is_empty() {
            self.clauses.push(format!("WITH {}", self.scope_list()));
        }
        self.clauses.push(clause);
        self.bind(binds);
    }

    pub(crate) fn write_clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// `CREATE p1, p2, …` binding every reference in `binds`.
    pub(crate) fn create(&mut self, patterns: Vec<String>, binds: Vec<VarRef>) {
        if patterns.is_empty() {
            return;
        }
        self.clauses.push(format!("CREATE {}", patterns.join(", ")));
        for r in &binds {
            self.bind(r);
        }
    }

    /// Keep only the first row produced so far.
    pub(crate) fn limit_one(&mut self) {
        let scope = self.scope_list();
        self.clauses.push(format!("WITH {scope} LIMIT 1"));
    }

    pub(crate) fn drop_from_scope(&mut self, r: &VarRef) {
        self.scope.retain(|s| s != r);
    }

    fn bind(&mut self, r: &VarRef) {
        if !self.scope.contains(r) {
            self.scope.push(r.clone());
        }
    }

    fn scope_list(&self) -> String {
        self.scope
            .iter()
            .map(VarRef::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn finish(mut self, returns: &[VarRef]) -> (String, Parameters) {
        if !returns.is_empty() {
            let projection = returns
                .iter()
                .map(|r| format!("ID({r}) AS {r}"))
                .collect::<Vec<_>>()
                .join(", ");
            self.clauses.push(format!("RETURN {projection}"));
        }
        (self.clauses.join("\n"), self.parameters)
    }
}

// ── Compiler ─────────────────────────────────────────────────────

/// Collects the events of one graph walk. Not shared between threads; one
/// instance per save.
#[derive(Debug, Default)]
pub struct Compiler {
    identifiers: IdentifierManager,
    nodes: Vec<NodeBuilder>,
    relationships: Vec<RelationshipBuilder>,
    node_index: HashMap<VarRef, usize>,
    relationship_index: HashMap<VarRef, usize>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node to be created with `labels`.
    pub fn new_node(&mut self, labels: impl IntoIterator<Item = String>) -> VarRef {
        let r = self.identifiers.next_identifier();
        self.push_node(NodeBuilder::new_node(r.clone(), labels.into_iter().collect()));
        r
    }

    /// A persisted node carrying `labels` (the complete current set).
    pub fn existing_node(
        &mut self,
        id: NodeId,
        labels: impl IntoIterator<Item = String>,
    ) -> VarRef {
        let r = self.identifiers.next_identifier();
        self.push_node(NodeBuilder::existing_node(
            r.clone(),
            id,
            labels.into_iter().collect(),
        ));
        r
    }

    pub fn node(&mut self, r: &VarRef) -> Result<&mut NodeBuilder> {
        let index = *self
            .node_index
            .get(r)
            .ok_or_else(|| CompileError::UnknownReference(r.clone()))?;
        Ok(&mut self.nodes[index])
    }

    /// A new relationship `(start)-[:relationship_type]->(end)`.
    pub fn relate(
        &mut self,
        start: &VarRef,
        relationship_type: &str,
        end: &VarRef,
    ) -> Result<VarRef> {
        self.reference_endpoints(start, end)?;
        let r = self.identifiers.next_identifier();
        self.push_relationship(RelationshipBuilder::new_relationship(
            r.clone(),
            start.clone(),
            relationship_type.to_string(),
            end.clone(),
        ));
        Ok(r)
    }

    /// Remove one persisted relationship between `start` and `end`.
    pub fn unrelate(
        &mut self,
        start: &VarRef,
        relationship_type: &str,
        end: &VarRef,
        id: Option<RelationshipId>,
    ) -> Result<VarRef> {
        self.reference_endpoints(start, end)?;
        let r = self.identifiers.next_identifier();
        self.push_relationship(RelationshipBuilder::deleted_relationship(
            r.clone(),
            start.clone(),
            relationship_type.to_string(),
            end.clone(),
            id,
        ));
        Ok(r)
    }

    /// A persisted relationship entity whose properties may have changed.
    pub fn existing_relationship(&mut self, id: RelationshipId, relationship_type: &str) -> VarRef {
        let r = self.identifiers.next_identifier();
        self.push_relationship(RelationshipBuilder::existing_relationship(
            r.clone(),
            id,
            relationship_type.to_string(),
        ));
        r
    }

    pub fn relationship(&mut self, r: &VarRef) -> Result<&mut RelationshipBuilder> {
        let index = *self
            .relationship_index
            .get(r)
            .ok_or_else(|| CompileError::UnknownReference(r.clone()))?;
        Ok(&mut self.relationships[index])
    }

    /// True if compiling now would produce a statement.
    pub fn has_changes(&self) -> bool {
        self.nodes.iter().any(NodeBuilder::has_changes)
            || self.relationships.iter().any(RelationshipBuilder::is_emitted)
    }

    /// Render everything collected so far. `None` when nothing would be
    /// written.
    pub fn compile(self) -> Option<Statement> {
        if !self.has_changes() {
            tracing::debug!("Nothing to compile");
            return None;
        }

        let mut w = StatementWriter::default();
        let mut returns = Vec::new();
        let mut version_checked = Vec::new();

        let (patterns, binds): (Vec<_>, Vec<_>) = self
            .nodes
            .iter()
            .filter(|n| n.is_new())
            .map(|n| (n.render_create_pattern(&mut w), n.reference().clone()))
            .unzip();
        returns.extend(binds.iter().cloned());
        w.create(patterns, binds);

        let mut updated_nodes = 0;
        for node in self.nodes.iter().filter(|n| !n.is_new() && n.is_emitted()) {
            node.render_update(&mut w);
            if node.has_changes() {
                updated_nodes += 1;
            }
            if node.is_version_checked() {
                version_checked.push(node.reference().clone());
            }
        }

        let (patterns, binds): (Vec<_>, Vec<_>) = self
            .relationships
            .iter()
            .filter(|r| r.is_new())
            .map(|r| (r.render_create_pattern(&mut w), r.reference().clone()))
            .unzip();
        let new_relationships = patterns.len();
        w.create(patterns, binds);

        for rel in self
            .relationships
            .iter()
            .filter(|r| !r.is_new() && !r.is_deleted() && r.is_emitted())
        {
            rel.render_update(&mut w);
            if rel.is_version_checked() {
                version_checked.push(rel.reference().clone());
            }
        }

        let mut deleted = 0;
        for rel in self.relationships.iter().filter(|r| r.is_deleted()) {
            rel.render_delete(&mut w);
            deleted += 1;
        }

        returns.extend(
            self.relationships
                .iter()
                .filter(|r| r.is_returned())
                .map(|r| r.reference().clone()),
        );
        for r in &version_checked {
            if !returns.contains(r) {
                returns.push(r.clone());
            }
        }

        let (cypher, parameters) = w.finish(&returns);
        tracing::debug!(
            new_nodes = self.nodes.iter().filter(|n| n.is_new()).count(),
            updated_nodes,
            new_relationships,
            deleted_relationships = deleted,
            parameters = parameters.len(),
            "Statement compiled"
        );

        Some(Statement {
            cypher,
            parameters,
            returns,
            version_checked,
        })
    }

    fn reference_endpoints(&mut self, start: &VarRef, end: &VarRef) -> Result<()> {
        for r in [start, end] {
            self.node(r)?.mark_referenced();
        }
        Ok(())
    }

    fn push_node(&mut self, node: NodeBuilder) {
        self.node_index.insert(node.reference().clone(), self.nodes.len());
        self.nodes.push(node);
    }

    fn push_relationship(&mut self, relationship: RelationshipBuilder) {
        self.relationship_index
            .insert(relationship.reference().clone(), self.relationships.len());
        self.relationships.push(relationship);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_compiler_produces_nothing() {
        assert!(Compiler::new().compile().is_none());
    }

    #[test]
    fn test_clean_existing_nodes_produce_nothing() {
        let mut c = Compiler::new();
        let a = c.existing_node(NodeId(1), labels(&["Person"]));
        c.node(&a)
            .unwrap()
            .label_changes(&BTreeSet::new(), &BTreeSet::new());
        c.existing_node(NodeId(2), labels(&["Person"]));
        assert!(!c.has_changes());
        assert!(c.compile().is_none());
    }

    #[test]
    fn test_two_new_linked_nodes() {
        let mut c = Compiler::new();
        let a = c.new_node(labels(&["Person"]));
        c.node(&a).unwrap().add_property("name", "a").unwrap();
        let b = c.new_node(labels(&["Person"]));
        c.node(&b).unwrap().add_property("name", "b").unwrap();
        let r = c.relate(&a, "KNOWS", &b).unwrap();

        let stmt = c.compile().unwrap();
        assert_eq!(
            stmt.cypher,
            "CREATE (_0:`Person` $_0_props), (_1:`Person` $_1_props)\n\
             CREATE (_0)-[_2:`KNOWS` $_2_props]->(_1)\n\
             RETURN ID(_0) AS _0, ID(_1) AS _1"
        );
        assert_eq!(stmt.returns, vec![a.clone(), b]);
        assert!(!stmt.returns.contains(&r));
        assert!(stmt.parameters.contains_key("_0_props"));
        assert!(stmt.parameters.contains_key("_2_props"));
        assert!(stmt.expects_row());
    }

    #[test]
    fn test_relationship_entity_id_is_returned() {
        let mut c = Compiler::new();
        let a = c.new_node(labels(&["Person"]));
        let b = c.new_node(labels(&["Movie"]));
        let r = c.relate(&a, "RATED", &b).unwrap();
        c.relationship(&r)
            .unwrap()
            .as_entity()
            .unwrap()
            .add_property("stars", 5)
            .unwrap();

        let stmt = c.compile().unwrap();
        assert!(stmt.cypher.ends_with("RETURN ID(_0) AS _0, ID(_1) AS _1, ID(_2) AS _2"));
        assert_eq!(stmt.returns.len(), 3);
    }

    #[test]
    fn test_new_node_omits_null_properties() {
        let mut c = Compiler::new();
        let a = c.new_node(labels(&["Person"]));
        c.node(&a)
            .unwrap()
            .add_property("name", "a")
            .unwrap()
            .add_property("nick", Value::Null)
            .unwrap();

        let stmt = c.compile().unwrap();
        let Some(Value::Map(props)) = stmt.parameters.get("_0_props") else {
            panic!("missing property bundle");
        };
        assert_eq!(props.len(), 1);
        assert!(props.contains_key("name"));
    }

    #[test]
    fn test_existing_node_update_with_label_diff() {
        let mut c = Compiler::new();
        let n = c.existing_node(NodeId(9), labels(&["Person", "B", "C"]));
        c.node(&n)
            .unwrap()
            .label_changes(&set(&["C"]), &set(&["A"]));

        let stmt = c.compile().unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (_0) WHERE ID(_0) = $_0_id\n\
             SET _0:`Person`:`B`:`C`\n\
             REMOVE _0:`A`"
        );
        assert_eq!(stmt.parameters.get("_0_id"), Some(&Value::from(9)));
        assert!(!stmt.expects_row());
    }

    #[test]
    fn test_existing_node_property_delta() {
        let mut c = Compiler::new();
        let n = c.existing_node(NodeId(3), labels(&["Person"]));
        c.node(&n).unwrap().add_property("name", "b").unwrap();

        let stmt = c.compile().unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (_0) WHERE ID(_0) = $_0_id\nSET _0 += $_0_props"
        );
        assert!(!stmt.cypher.contains("REMOVE"));
    }

    #[test]
    fn test_version_checked_update_is_projected() {
        let mut c = Compiler::new();
        let n = c.existing_node(NodeId(3), labels(&["Account"]));
        c.node(&n)
            .unwrap()
            .version_check("version", 4)
            .unwrap()
            .add_property("version", 5)
            .unwrap();

        let stmt = c.compile().unwrap();
        assert!(stmt
            .cypher
            .starts_with("MATCH (_0) WHERE ID(_0) = $_0_id AND _0.`version` = $_0_version"));
        assert!(stmt.cypher.ends_with("RETURN ID(_0) AS _0"));
        assert_eq!(stmt.version_checked, vec![n]);
        assert_eq!(stmt.parameters.get("_0_version"), Some(&Value::from(4)));
    }

    #[test]
    fn test_new_relationship_between_existing_nodes() {
        let mut c = Compiler::new();
        let a = c.existing_node(NodeId(1), labels(&["Person"]));
        let b = c.existing_node(NodeId(2), labels(&["Person"]));
        c.relate(&a, "KNOWS", &b).unwrap();

        let stmt = c.compile().unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (_0) WHERE ID(_0) = $_0_id\n\
             WITH _0\n\
             MATCH (_1) WHERE ID(_1) = $_1_id\n\
             CREATE (_0)-[_2:`KNOWS` $_2_props]->(_1)"
        );
    }

    #[test]
    fn test_delete_without_id_removes_one_instance() {
        let mut c = Compiler::new();
        let a = c.existing_node(NodeId(1), labels(&["Person"]));
        let b = c.existing_node(NodeId(2), labels(&["Person"]));
        c.unrelate(&a, "KNOWS", &b, None).unwrap();

        let stmt = c.compile().unwrap();
        assert!(stmt.cypher.contains(
            "WITH _0, _1\n\
             OPTIONAL MATCH (_0)-[_2:`KNOWS`]->(_1)\n\
             WITH _0, _1, _2 LIMIT 1\n\
             DELETE _2"
        ));
    }

    #[test]
    fn test_delete_by_relationship_entity_id() {
        let mut c = Compiler::new();
        let a = c.existing_node(NodeId(1), labels(&["Person"]));
        let b = c.existing_node(NodeId(2), labels(&["Movie"]));
        c.unrelate(&a, "RATED", &b, Some(RelationshipId(40))).unwrap();

        let stmt = c.compile().unwrap();
        assert!(stmt
            .cypher
            .contains("OPTIONAL MATCH (_0)-[_2:`RATED`]->(_1) WHERE ID(_2) = $_2_id\nDELETE _2"));
        assert_eq!(stmt.parameters.get("_2_id"), Some(&Value::from(40)));
    }

    #[test]
    fn test_fragment_order() {
        let mut c = Compiler::new();
        let old = c.existing_node(NodeId(1), labels(&["Person"]));
        c.node(&old).unwrap().add_property("name", "x").unwrap();
        let gone = c.existing_node(NodeId(2), labels(&["Person"]));
        let fresh = c.new_node(labels(&["Person"]));
        c.unrelate(&old, "KNOWS", &gone, None).unwrap();
        c.relate(&old, "KNOWS", &fresh).unwrap();
        let rating = c.existing_relationship(RelationshipId(8), "RATED");
        c.relationship(&rating)
            .unwrap()
            .add_property("stars", 1)
            .unwrap();

        let stmt = c.compile().unwrap();
        let pos = |needle: &str| stmt.cypher.find(needle).unwrap();
        assert!(pos("CREATE (_2:") < pos("MATCH (_0)"));
        assert!(pos("MATCH (_0)") < pos("MATCH (_1)"));
        assert!(pos("MATCH (_1)") < pos("CREATE (_0)-[_4"));
        assert!(pos("CREATE (_0)-[_4") < pos("MATCH ()-[_5]->()"));
        assert!(pos("MATCH ()-[_5]->()") < pos("DELETE _3"));
        assert!(pos("DELETE _3") < pos("RETURN ID(_2) AS _2"));
    }

    #[test]
    fn test_unknown_reference() {
        let mut c = Compiler::new();
        let a = c.new_node(labels(&["Person"]));
        let mut other = Compiler::new();
        other.new_node(labels(&["Person"]));
        let stray = other.new_node(labels(&["Person"]));
        assert_eq!(
            c.relate(&a, "KNOWS", &stray).unwrap_err(),
            CompileError::UnknownReference(stray)
        );
    }

    #[test]
    fn test_duplicate_property_through_compiler() {
        let mut c = Compiler::new();
        let a = c.new_node(labels(&["Person"]));
        c.node(&a).unwrap().add_property("name", "a").unwrap();
        assert!(matches!(
            c.node(&a).unwrap().add_property("name", "a"),
            Err(CompileError::DuplicateProperty { .. })
        ));
    }
}
