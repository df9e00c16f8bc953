//! Variable references local to one compiled statement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Symbolic name bound to one node or relationship inside a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarRef(String);

impl VarRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parameter key of this reference's property bundle.
    pub fn props_key(&self) -> String {
        format!("{}_props", self.0)
    }

    /// Parameter key of this reference's database id.
    pub fn id_key(&self) -> String {
        format!("{}_id", self.0)
    }

    /// Parameter key of this reference's expected version.
    pub fn version_key(&self) -> String {
        format!("{}_version", self.0)
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out `_0`, `_1`, … for one compiler instance.
#[derive(Debug, Default)]
pub struct IdentifierManager {
    next: usize,
}

impl IdentifierManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_identifier(&mut self) -> VarRef {
        let r = VarRef(format!("_{}", self.next));
        self.next += 1;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_monotonic() {
        let mut ids = IdentifierManager::new();
        assert_eq!(ids.next_identifier().as_str(), "_0");
        assert_eq!(ids.next_identifier().as_str(), "_1");
        assert_eq!(ids.next_identifier().as_str(), "_2");
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let mut a = IdentifierManager::new();
        a.next_identifier();
        let mut b = IdentifierManager::new();
        assert_eq!(b.next_identifier().as_str(), "_0");
    }

    #[test]
    fn test_parameter_keys() {
        let r = IdentifierManager::new().next_identifier();
        assert_eq!(r.props_key(), "_0_props");
        assert_eq!(r.id_key(), "_0_id");
        assert_eq!(r.version_key(), "_0_version");
    }
}
