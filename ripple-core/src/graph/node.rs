//! Graph Nodes
//!
//! Identity and state shared by every node of the dependency graph: cells,
//! computations and observers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the dependency graph.
///
/// Ids are allocated from a process-wide counter, so they stay unique even
/// though every graph lives on a single thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dirty state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// The cached value is up-to-date.
    Clean,

    /// Something upstream changed, but not a direct dependency. The node
    /// reruns only if one of its dependencies reports a new version.
    MaybeDirty,

    /// A direct dependency changed, the node never ran, or its last run
    /// failed. The next read reruns it.
    Dirty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn node_id_display() {
        let id = NodeId::new();
        assert_eq!(id.to_string(), format!("#{}", id.0));
    }

    #[test]
    fn dirty_states_are_ordered() {
        assert!(DirtyState::Clean < DirtyState::MaybeDirty);
        assert!(DirtyState::MaybeDirty < DirtyState::Dirty);
    }
}
