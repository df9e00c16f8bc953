//! Relationship fragments: creates, updates of relationship entities, and
//! single-instance deletes.

use graphmap_core::{Properties, RelationshipId, Value};

use crate::compiler::StatementWriter;
use crate::error::{CompileError, Result};
use crate::identifiers::VarRef;
use crate::node::escape;

#[derive(Debug, Clone)]
pub(crate) enum RelationshipState {
    New {
        /// The relationship is itself an entity and needs its id back.
        entity: bool,
    },
    Existing {
        id: RelationshipId,
        version_check: Option<(String, i64)>,
    },
    Deleted {
        id: Option<RelationshipId>,
    },
}

/// One relationship between two node references in the same statement.
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    reference: VarRef,
    start: Option<VarRef>,
    end: Option<VarRef>,
    relationship_type: String,
    state: RelationshipState,
    properties: Properties,
}

impl RelationshipBuilder {
    pub(crate) fn new_relationship(
        reference: VarRef,
        start: VarRef,
        relationship_type: String,
        end: VarRef,
    ) -> Self {
        Self {
            reference,
            start: Some(start),
            end: Some(end),
            relationship_type,
            state: RelationshipState::New { entity: false },
            properties: Properties::new(),
        }
    }

    pub(crate) fn existing_relationship(
        reference: VarRef,
        id: RelationshipId,
        relationship_type: String,
    ) -> Self {
        Self {
            reference,
            start: None,
            end: None,
            relationship_type,
            state: RelationshipState::Existing {
                id,
                version_check: None,
            },
            properties: Properties::new(),
        }
    }

    pub(crate) fn deleted_relationship(
        reference: VarRef,
        start: VarRef,
        relationship_type: String,
        end: VarRef,
        id: Option<RelationshipId>,
    ) -> Self {
        Self {
            reference,
            start: Some(start),
            end: Some(end),
            relationship_type,
            state: RelationshipState::Deleted { id },
            properties: Properties::new(),
        }
    }

    pub fn reference(&self) -> &VarRef {
        &self.reference
    }

    pub fn relationship_type(&self) -> &str {
        &self.relationship_type
    }

    /// Project this new relationship's id in the trailing `RETURN`.
    pub fn as_entity(&mut self) -> Result<&mut Self> {
        if let RelationshipState::New { entity } = &mut self.state {
            *entity = true;
            return Ok(self);
        }
        Err(self.wrong_kind("new relationship"))
    }

    pub fn add_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        if matches!(self.state, RelationshipState::Deleted { .. }) {
            return Err(self.wrong_kind("created or updated relationship"));
        }
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

    pub fn version_check(&mut self, field: impl Into<String>, expected: i64) -> Result<&mut Self> {
        if let RelationshipState::Existing { version_check, .. } = &mut self.state {
            *version_check = Some((field.into(), expected));
            return Ok(self);
        }
        Err(self.wrong_kind("existing relationship"))
    }

    pub(crate) fn is_new(&self) -> bool {
        matches!(self.state, RelationshipState::New { .. })
    }

    pub(crate) fn is_deleted(&self) -> bool {
        matches!(self.state, RelationshipState::Deleted { .. })
    }

    pub(crate) fn is_returned(&self) -> bool {
        matches!(self.state, RelationshipState::New { entity: true })
            || self.is_version_checked()
    }

    pub(crate) fn is_version_checked(&self) -> bool {
        matches!(
            self.state,
            RelationshipState::Existing {
                version_check: Some(_),
                ..
            }
        )
    }

    /// Updates with nothing to write are dropped entirely.
    pub(crate) fn is_emitted(&self) -> bool {
        match self.state {
            RelationshipState::Existing { .. } => {
                !self.properties.is_empty() || self.is_version_checked()
            }
            _ => true,
        }
    }

    /// `(_0)-[_2:`KNOWS` $_2_props]->(_1)` for the batched create.
    pub(crate) fn render_create_pattern(&self, w: &mut StatementWriter) -> String {
        let r = &self.reference;
        let props: Properties = self
            .properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        w.parameter(r.props_key(), Value::Map(props));
        format!(
            "({})-[{r}:{} ${}]->({})",
            display(&self.start),
            escape(&self.relationship_type),
            r.props_key(),
            display(&self.end)
        )
    }

    pub(crate) fn render_update(&self, w: &mut StatementWriter) {
        let RelationshipState::Existing { id, version_check } = &self.state else {
            return;
        };
        let r = &self.reference;

        let mut clause = format!("MATCH ()-[{r}]->() WHERE ID({r}) = ${}", r.id_key());
        w.parameter(r.id_key(), Value::from(id.0));
        if let Some((field, expected)) = version_check {
            clause.push_str(&format!(" AND {r}.{} = ${}", escape(field), r.version_key()));
            w.parameter(r.version_key(), Value::from(*expected));
        }
        w.read_clause(clause, r);

        if !self.properties.is_empty() {
            w.parameter(r.props_key(), Value::Map(self.properties.clone()));
            w.write_clause(format!("SET {r} += ${}", r.props_key()));
        }
    }

    /// Deletes exactly one instance: by id when known, otherwise the first
    /// matching relationship between the two endpoints.
    pub(crate) fn render_delete(&self, w: &mut StatementWriter) {
        let RelationshipState::Deleted { id } = &self.state else {
            return;
        };
        let r = &self.reference;
        let pattern = format!(
            "OPTIONAL MATCH ({})-[{r}:{}]->({})",
            display(&self.start),
            escape(&self.relationship_type),
            display(&self.end)
        );

        match id {
            Some(id) => {
                w.parameter(r.id_key(), Value::from(id.0));
                w.read_clause(format!("{pattern} WHERE ID({r}) = ${}", r.id_key()), r);
            }
            None => {
                w.read_clause(pattern, r);
                w.limit_one();
            }
        }
        w.write_clause(format!("DELETE {r}"));
        w.drop_from_scope(r);
    }

    fn wrong_kind(&self, expected: &'static str) -> CompileError {
        CompileError::WrongKind {
            reference: self.reference.clone(),
            expected,
        }
    }
}

fn display(r: &Option<VarRef>) -> &str {
    r.as_ref().map(VarRef::as_str).unwrap_or("")
}
