use thiserror::Error;

/// Defects in a schema description.
///
/// These indicate that whoever produced the description (annotation scanner,
/// declarative config, hand-written builder) handed over something the mapper
/// cannot work with. They are never corrected silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    #[error("Entity type {0} is declared more than once")]
    DuplicateType(String),

    #[error("Entity type {0} has no identity field")]
    MissingIdentityField(String),

    #[error("Entity type {type_name} declares more than one version field: {fields:?}")]
    MultipleVersionFields {
        type_name: String,
        fields: Vec<String>,
    },

    #[error("Entity type {type_name} names unknown supertype {supertype}")]
    UnknownSupertype {
        type_name: String,
        supertype: String,
    },

    #[error("Relationship field {type_name}.{field} targets unknown type {target}")]
    UnknownRelationshipTarget {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("Relationship entity {0} must declare exactly one relationship type")]
    MissingRelationshipType(String),

    #[error("Type hierarchy of {0} is cyclic")]
    CyclicHierarchy(String),
}
