//! Schema description consumed by the mapper.
//!
//! The schema is plain data built ahead of time, either through the
//! [`TypeDescription`] builder methods or deserialized from a declarative
//! file. [`Schema::new`] validates it once; everything downstream assumes a
//! valid schema.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Whether a type maps to nodes or to relationships with properties.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Node,
    Relationship,
}

/// Direction of a relationship relative to the declaring node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

/// A relationship-valued field on a node type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipField {
    pub name: String,
    pub relationship_type: String,
    #[serde(default)]
    pub direction: Direction,
    /// Type at the other end of the relationship.
    pub target: String,
}

/// Unvalidated description of one entity type.
///
/// This is the shape produced by the metadata collaborator. Version fields
/// are a list here so that a description declaring two of them can be
/// represented, and rejected, rather than silently collapsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDescription {
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    /// Static labels (or, for relationship entities, the single relationship type).
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub identity_field: Option<String>,
    #[serde(default)]
    pub version_fields: Vec<String>,
    #[serde(default)]
    pub primary_index: Option<String>,
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<RelationshipField>,
    #[serde(default)]
    pub interface: bool,
}

impl TypeDescription {
    /// Describe a node type with the conventional `id` identity field and a
    /// static label equal to its name.
    pub fn node(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Node,
            labels: vec![name.to_string()],
            identity_field: Some("id".to_string()),
            ..Default::default()
        }
    }

    /// Describe a relationship entity type carrying `relationship_type`.
    pub fn relationship(name: &str, relationship_type: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Relationship,
            labels: vec![relationship_type.to_string()],
            identity_field: Some("id".to_string()),
            ..Default::default()
        }
    }

    /// Describe an interface (capability) type. Interfaces carry no
    /// identity of their own and exist only to index implementors.
    pub fn interface(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: true,
            ..Default::default()
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.labels.push(label.to_string());
        self
    }

    pub fn identity(mut self, field: &str) -> Self {
        self.identity_field = Some(field.to_string());
        self
    }

    pub fn version(mut self, field: &str) -> Self {
        self.version_fields.push(field.to_string());
        self
    }

    pub fn primary_index(mut self, field: &str) -> Self {
        self.primary_index = Some(field.to_string());
        self
    }

    pub fn extends(mut self, supertype: &str) -> Self {
        self.supertypes.push(supertype.to_string());
        self
    }

    pub fn relationship_field(
        mut self,
        name: &str,
        relationship_type: &str,
        direction: Direction,
        target: &str,
    ) -> Self {
        self.relationships.push(RelationshipField {
            name: name.to_string(),
            relationship_type: relationship_type.to_string(),
            direction,
            target: target.to_string(),
        });
        self
    }
}

/// Validated description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: String,
    pub kind: EntityKind,
    pub labels: Vec<String>,
    pub identity_field: String,
    pub version_field: Option<String>,
    pub primary_index: Option<String>,
    pub supertypes: Vec<String>,
    pub relationships: Vec<RelationshipField>,
    pub interface: bool,
}

impl EntitySchema {
    pub fn is_relationship_entity(&self) -> bool {
        self.kind == EntityKind::Relationship
    }

    pub fn is_versioned(&self) -> bool {
        self.version_field.is_some()
    }

    /// Relationship type of a relationship entity.
    pub fn relationship_type(&self) -> Option<&str> {
        match self.kind {
            EntityKind::Relationship => self.labels.first().map(String::as_str),
            EntityKind::Node => None,
        }
    }
}

/// The complete, validated schema for one session factory.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, EntitySchema>,
}

impl Schema {
    /// Validate a set of type descriptions.
    pub fn new(descriptions: Vec<TypeDescription>) -> Result<Self, SchemaError> {
        let mut types = BTreeMap::new();

        for desc in &descriptions {
            if types.contains_key(&desc.name) {
                return Err(SchemaError::DuplicateType(desc.name.clone()));
            }
            types.insert(desc.name.clone(), validate(desc)?);
        }

        for desc in &descriptions {
            for supertype in &desc.supertypes {
                if !types.contains_key(supertype) {
                    return Err(SchemaError::UnknownSupertype {
                        type_name: desc.name.clone(),
                        supertype: supertype.clone(),
                    });
                }
            }
            for field in &desc.relationships {
                if !types.contains_key(&field.target) {
                    return Err(SchemaError::UnknownRelationshipTarget {
                        type_name: desc.name.clone(),
                        field: field.name.clone(),
                        target: field.target.clone(),
                    });
                }
            }
        }

        let schema = Self { types };
        for name in schema.types.keys() {
            schema.check_acyclic(name)?;
        }

        tracing::debug!(types = schema.types.len(), "Schema validated");
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Result<&EntitySchema, SchemaError> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &EntitySchema> {
        self.types.values()
    }

    /// Every ancestor type of `name` the schema describes, nearest first,
    /// each listed once.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_ancestors(name, &mut out, &mut seen);
        out
    }

    /// Concrete types that are `name` or descend from it.
    pub fn implementors(&self, name: &str) -> Vec<String> {
        self.types
            .values()
            .filter(|t| !t.interface)
            .filter(|t| t.name == name || self.ancestors(&t.name).iter().any(|a| a == name))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Static labels for a node type: its own labels, then every ancestor's,
    /// without duplicates.
    pub fn labels_for(&self, name: &str) -> Result<Vec<String>, SchemaError> {
        let schema = self.get(name)?;
        let mut labels = schema.labels.clone();
        for ancestor in self.ancestors(name) {
            if let Some(a) = self.types.get(&ancestor) {
                for label in &a.labels {
                    if !labels.contains(label) {
                        labels.push(label.clone());
                    }
                }
            }
        }
        Ok(labels)
    }

    /// The relationship-entity type persisted under `relationship_type`, if
    /// the schema describes one.
    pub fn resolve_relationship_type(&self, relationship_type: &str) -> Option<&EntitySchema> {
        self.types
            .values()
            .filter(|t| !t.interface)
            .find(|t| t.relationship_type() == Some(relationship_type))
    }

    /// Find the node type whose static labels are exactly covered by `labels`,
    /// preferring the most specific (most labels) match.
    pub fn resolve_node_type<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a str> + Clone,
    ) -> Option<&EntitySchema> {
        self.types
            .values()
            .filter(|t| t.kind == EntityKind::Node && !t.interface && !t.labels.is_empty())
            .filter(|t| {
                self.labels_for(&t.name)
                    .map(|own| own.iter().all(|l| labels.clone().into_iter().any(|x| x == l)))
                    .unwrap_or(false)
            })
            .max_by_key(|t| self.labels_for(&t.name).map(|l| l.len()).unwrap_or(0))
    }

    fn collect_ancestors(&self, name: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
        let Some(schema) = self.types.get(name) else {
            return;
        };
        for supertype in &schema.supertypes {
            if seen.insert(supertype.clone()) {
                out.push(supertype.clone());
                self.collect_ancestors(supertype, out, seen);
            }
        }
    }

    fn check_acyclic(&self, name: &str) -> Result<(), SchemaError> {
        let mut stack = vec![(name.to_string(), 0usize)];
        let mut path: Vec<String> = Vec::new();
        while let Some((current, depth)) = stack.pop() {
            path.truncate(depth);
            if path.contains(&current) {
                return Err(SchemaError::CyclicHierarchy(name.to_string()));
            }
            path.push(current.clone());
            if let Some(schema) = self.types.get(&current) {
                for supertype in &schema.supertypes {
                    stack.push((supertype.clone(), depth + 1));
                }
            }
        }
        Ok(())
    }
}

fn validate(desc: &TypeDescription) -> Result<EntitySchema, SchemaError> {
    if desc.version_fields.len() > 1 {
        return Err(SchemaError::MultipleVersionFields {
            type_name: desc.name.clone(),
            fields: desc.version_fields.clone(),
        });
    }

    let identity_field = match (&desc.identity_field, desc.interface) {
        (Some(field), _) if !field.is_empty() => field.clone(),
        (_, true) => String::new(),
        _ => return Err(SchemaError::MissingIdentityField(desc.name.clone())),
    };

    if desc.kind == EntityKind::Relationship && desc.labels.len() != 1 {
        return Err(SchemaError::MissingRelationshipType(desc.name.clone()));
    }

    Ok(EntitySchema {
        name: desc.name.clone(),
        kind: desc.kind,
        labels: desc.labels.clone(),
        identity_field,
        version_field: desc.version_fields.first().cloned(),
        primary_index: desc.primary_index.clone(),
        supertypes: desc.supertypes.clone(),
        relationships: desc.relationships.clone(),
        interface: desc.interface,
    })
}
