//! Node fragments: batched creates and match-by-id updates.

use std::collections::BTreeSet;

use graphmap_core::{NodeId, Properties, Value};

use crate::compiler::StatementWriter;
use crate::error::{CompileError, Result};
use crate::identifiers::VarRef;

#[derive(Debug, Clone)]
pub(crate) enum NodeState {
    New,
    Existing {
        id: NodeId,
        version_check: Option<(String, i64)>,
    },
}

/// Accumulates one node's labels and properties until the statement is
/// rendered.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    reference: VarRef,
    state: NodeState,
    labels: Vec<String>,
    removed_labels: BTreeSet<String>,
    labels_changed: bool,
    properties: Properties,
    referenced: bool,
}

impl NodeBuilder {
    pub(crate) fn new_node(reference: VarRef, labels: Vec<String>) -> Self {
        Self {
            reference,
            state: NodeState::New,
            labels,
            removed_labels: BTreeSet::new(),
            labels_changed: false,
            properties: Properties::new(),
            referenced: false,
        }
    }

    pub(crate) fn existing_node(reference: VarRef, id: NodeId, labels: Vec<String>) -> Self {
        Self {
            reference,
            state: NodeState::Existing {
                id,
                version_check: None,
            },
            labels,
            removed_labels: BTreeSet::new(),
            labels_changed: false,
            properties: Properties::new(),
            referenced: false,
        }
    }

    pub fn reference(&self) -> &VarRef {
        &self.reference
    }

    pub fn is_new(&self) -> bool {
        matches!(self.state, NodeState::New)
    }

    pub fn id(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Existing { id, .. } => Some(id),
            NodeState::New => None,
        }
    }

    /// Add one property. A key may only be added once per node.
    pub fn add_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        let key = key.into();
        if self.properties.contains_key(&key) {
            return Err(CompileError::DuplicateProperty {
                reference: self.reference.clone(),
                key,
            });
        }
        self.properties.insert(key, value.into());
        Ok(self)
    }

    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<&mut Self> {
        for (key, value) in properties {
            self.add_property(key, value)?;
        }
        Ok(self)
    }

    /// Record that the label set differs from the previous save: `added`
    /// forces the full set to be re-asserted and `removed` is emitted as an
    /// explicit removal.
    pub fn label_changes(
        &mut self,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> &mut Self {
        self.labels_changed |= !added.is_empty() || !removed.is_empty();
        self.removed_labels.extend(removed.iter().cloned());
        self
    }

    /// Guard the update with `field = expected` on the stored node.
    pub fn version_check(&mut self, field: impl Into<String>, expected: i64) -> Result<&mut Self> {
        if let NodeState::Existing { version_check, .. } = &mut self.state {
            *version_check = Some((field.into(), expected));
            return Ok(self);
        }
        Err(CompileError::WrongKind {
            reference: self.reference.clone(),
            expected: "existing node",
        })
    }

    pub(crate) fn mark_referenced(&mut self) {
        self.referenced = true;
    }

    pub(crate) fn is_version_checked(&self) -> bool {
        matches!(
            self.state,
            NodeState::Existing {
                version_check: Some(_),
                ..
            }
        )
    }

    /// True if rendering this existing node would change anything.
    pub fn has_changes(&self) -> bool {
        match self.state {
            NodeState::New => true,
            NodeState::Existing { .. } => {
                !self.properties.is_empty() || self.labels_changed || self.is_version_checked()
            }
        }
    }

    /// True if the node must appear in the statement at all.
    pub(crate) fn is_emitted(&self) -> bool {
        self.has_changes() || self.referenced
    }

    /// `(_0:`A`:`B` $_0_props)` for the batched create.
    pub(crate) fn render_create_pattern(&self, w: &mut StatementWriter) -> String {
        let props: Properties = self
            .properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let key = self.reference.props_key();
        w.parameter(key.clone(), Value::Map(props));
        format!("({}{} ${key})", self.reference, label_string(&self.labels))
    }

    pub(crate) fn render_update(&self, w: &mut StatementWriter) {
        let NodeState::Existing { id, version_check } = &self.state else {
            return;
        };
        let r = &self.reference;

        let mut clause = format!("MATCH ({r}) WHERE ID({r}) = ${}", r.id_key());
        w.parameter(r.id_key(), Value::from(id.0));
        if let Some((field, expected)) = version_check {
            clause.push_str(&format!(" AND {r}.{} = ${}", escape(field), r.version_key()));
            w.parameter(r.version_key(), Value::from(*expected));
        }
        w.read_clause(clause, r);

        if !self.has_changes() {
            return;
        }
        if !self.properties.is_empty() {
            w.parameter(r.props_key(), Value::Map(self.properties.clone()));
            w.write_clause(format!("SET {r} += ${}", r.props_key()));
        }
        if self.labels_changed {
            if !self.labels.is_empty() {
                w.write_clause(format!("SET {r}{}", label_string(&self.labels)));
            }
            let removed: Vec<String> = self.removed_labels.iter().cloned().collect();
            if !removed.is_empty() {
                w.write_clause(format!("REMOVE {r}{}", label_string(&removed)));
            }
        }
    }
}

pub(crate) fn label_string(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", escape(l))).collect()
}

/// Backtick-quote a label, relationship type or property name.
pub fn escape(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::IdentifierManager;

    fn existing() -> NodeBuilder {
        let r = IdentifierManager::new().next_identifier();
        NodeBuilder::existing_node(r, NodeId(7), vec!["Person".into()])
    }

    #[test]
    fn test_duplicate_property_fails_fast() {
        let mut node = existing();
        node.add_property("name", "a").unwrap();
        let err = node.add_property("name", "b").unwrap_err();
        assert!(matches!(err, CompileError::DuplicateProperty { ref key, .. } if key == "name"));
        assert_eq!(node.properties.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn test_clean_existing_node_has_no_changes() {
        let mut node = existing();
        assert!(!node.has_changes());
        assert!(!node.is_emitted());
        node.label_changes(&BTreeSet::new(), &BTreeSet::new());
        assert!(!node.has_changes());
        node.mark_referenced();
        assert!(node.is_emitted());
    }

    #[test]
    fn test_version_check_only_on_existing_nodes() {
        let r = IdentifierManager::new().next_identifier();
        let mut node = NodeBuilder::new_node(r, vec![]);
        assert!(node.version_check("version", 0).is_err());
        let mut node = existing();
        node.version_check("version", 3).unwrap();
        assert!(node.is_version_checked());
        assert!(node.has_changes());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("Person"), "`Person`");
        assert_eq!(escape("we`ird"), "`we``ird`");
        assert_eq!(label_string(&["A".into(), "B".into()]), ":`A`:`B`");
    }
}
