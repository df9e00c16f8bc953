use crate::identifiers::VarRef;

/// Mapping defects detected while building a statement. None of these are
/// data problems: they mean the caller (or its schema) is wrong.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Property {key} added twice to {reference}")]
    DuplicateProperty { reference: VarRef, key: String },

    #[error("Unknown variable reference: {0}")]
    UnknownReference(VarRef),

    #[error("{reference} is not a {expected}")]
    WrongKind {
        reference: VarRef,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, CompileError>;
