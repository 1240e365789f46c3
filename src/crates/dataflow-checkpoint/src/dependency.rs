//! Per-instance view of upstream checkpoints
//!
//! Every data message carries the id of its sender's latest checkpoint. The receiving
//! instance records the newest tag per sender here; the next checkpoint it takes copies
//! this map into its [`Metadata`](crate::Metadata).

use crate::checkpoint::{CheckpointId, Dependencies};
use std::collections::HashMap;
use tracing::trace;

/// Last known checkpoint id per upstream peer
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    current: Dependencies,
    previous: HashMap<String, CheckpointId>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dependency tag received from `peer`
    ///
    /// Last writer wins; tags are not compared.
    pub fn update_dependency(&mut self, peer: impl Into<String>, checkpoint_id: CheckpointId) {
        let peer = peer.into();
        trace!("Dependency on {} updated to {}", peer, checkpoint_id);
        if let Some(old) = self.current.insert(peer.clone(), checkpoint_id) {
            if old != checkpoint_id {
                self.previous.insert(peer, old);
            }
        }
    }

    /// Replace the whole view, e.g. with the dependencies a restored checkpoint recorded
    pub fn overwrite_all(&mut self, dependencies: Dependencies) {
        self.current = dependencies;
        self.previous.clear();
    }

    /// Copy of the tracked dependencies
    pub fn dependencies(&self) -> Dependencies {
        self.current.clone()
    }

    /// Tracked id for `peer`
    pub fn dependency(&self, peer: &str) -> Option<CheckpointId> {
        self.current.get(peer).copied()
    }

    /// The id `peer` was tracked at before its latest change, nil if there was none
    pub fn previous_dependency(&self, peer: &str) -> CheckpointId {
        self.previous.get(peer).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_writer_wins() {
        let mut tracker = DependencyTracker::new();
        let first = CheckpointId::new();
        let second = CheckpointId::new();

        tracker.update_dependency("source", first);
        tracker.update_dependency("source", second);

        assert_eq!(tracker.dependency("source"), Some(second));
        assert_eq!(tracker.previous_dependency("source"), first);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_repeated_tag_keeps_previous() {
        let mut tracker = DependencyTracker::new();
        let first = CheckpointId::new();
        let second = CheckpointId::new();

        tracker.update_dependency("source", first);
        tracker.update_dependency("source", second);
        tracker.update_dependency("source", second);

        assert_eq!(tracker.previous_dependency("source"), first);
    }

    #[test]
    fn test_previous_is_nil_for_unknown_peer() {
        let tracker = DependencyTracker::new();
        assert!(tracker.previous_dependency("nobody").is_nil());
        assert!(tracker.dependency("nobody").is_none());
    }

    #[test]
    fn test_overwrite_all_replaces_view() {
        let mut tracker = DependencyTracker::new();
        tracker.update_dependency("a", CheckpointId::new());
        tracker.update_dependency("b", CheckpointId::new());

        let restored_dep = CheckpointId::new();
        let mut restored = Dependencies::new();
        restored.insert("c".to_string(), restored_dep);
        tracker.overwrite_all(restored.clone());

        assert_eq!(tracker.dependencies(), restored);
        assert!(tracker.dependency("a").is_none());
    }

    #[test]
    fn test_dependencies_returns_copy() {
        let mut tracker = DependencyTracker::new();
        tracker.update_dependency("a", CheckpointId::new());
        let mut copy = tracker.dependencies();
        copy.clear();
        assert_eq!(tracker.len(), 1);
    }
}
