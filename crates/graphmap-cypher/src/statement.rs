//! The compiled output handed to the driver.

use std::collections::BTreeMap;

use graphmap_core::Value;
use serde::Serialize;

use crate::identifiers::VarRef;

/// Flat parameter map. Property bundles are `Value::Map`s under
/// `<reference>_props`.
pub type Parameters = BTreeMap<String, Value>;

/// One batched mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub cypher: String,
    pub parameters: Parameters,
    /// References whose database id is projected by the trailing `RETURN`,
    /// each aliased by its own name.
    pub returns: Vec<VarRef>,
    /// References matched with a version predicate. Zero result rows for a
    /// statement with any of these means a concurrent modification.
    pub version_checked: Vec<VarRef>,
}

impl Statement {
    /// True if a successful execution yields exactly one row.
    pub fn expects_row(&self) -> bool {
        !self.returns.is_empty()
    }

    pub fn is_version_checked(&self) -> bool {
        !self.version_checked.is_empty()
    }
}
