//! Per-node memory of dynamic labels written by the previous save.
//!
//! The store can add labels and remove labels but cannot set a node's
//! labels to an exact set, so removals have to be computed from what was
//! written last time.

use std::collections::{BTreeSet, HashMap};

use graphmap_core::NodeId;
use parking_lot::RwLock;

/// Dynamic labels applied to one node by its most recent save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelHistory {
    previous: BTreeSet<String>,
}

impl LabelHistory {
    pub fn previous(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// Compare `current` against the previously written set.
    pub fn diff(&self, current: &BTreeSet<String>) -> LabelDiff {
        LabelDiff {
            added: current.difference(&self.previous).cloned().collect(),
            removed: self.previous.difference(current).cloned().collect(),
        }
    }
}

/// Labels to add and remove to move a node from its previous label set to
/// its current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl LabelDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Get-or-create register of [`LabelHistory`] per node.
#[derive(Debug, Default)]
pub struct LabelHistoryRegister {
    histories: RwLock<HashMap<NodeId, LabelHistory>>,
}

impl LabelHistoryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// History for `id`, created empty on first access.
    pub fn get(&self, id: NodeId) -> LabelHistory {
        if let Some(history) = self.histories.read().get(&id) {
            return history.clone();
        }
        self.histories.write().entry(id).or_default().clone()
    }

    /// Record the labels written for `id` by a completed save.
    pub fn push(&self, id: NodeId, labels: BTreeSet<String>) {
        self.histories.write().entry(id).or_default().previous = labels;
    }

    pub fn len(&self) -> usize {
        self.histories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.read().is_empty()
    }

    pub fn clear(&self) {
        self.histories.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_adds_and_removes() {
        let register = LabelHistoryRegister::new();
        register.push(NodeId(1), set(&["A", "B"]));

        let diff = register.get(NodeId(1)).diff(&set(&["B", "C"]));
        assert_eq!(diff.added, set(&["C"]));
        assert_eq!(diff.removed, set(&["A"]));
    }

    #[test]
    fn test_get_creates_empty_history() {
        let register = LabelHistoryRegister::new();
        let history = register.get(NodeId(5));
        assert!(history.previous().is_empty());
        assert_eq!(register.len(), 1);

        let diff = history.diff(&set(&["X"]));
        assert_eq!(diff.added, set(&["X"]));
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_push_replaces_previous() {
        let register = LabelHistoryRegister::new();
        register.push(NodeId(1), set(&["A"]));
        register.push(NodeId(1), set(&["B"]));
        assert_eq!(register.get(NodeId(1)).previous(), &set(&["B"]));
        assert!(register.get(NodeId(1)).diff(&set(&["B"])).is_empty());
    }
}
