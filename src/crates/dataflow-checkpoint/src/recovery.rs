//! Recovery line computation
//!
//! Given the metadata of every retained checkpoint, the instance graph and the names of
//! the failed instances, the [`RecoveryLineCalculator`] selects one checkpoint per
//! instance such that no selected state has consumed a message whose sender's selected
//! state has not yet sent it (an *orphan* message).
//!
//! # Algorithm
//!
//! ```text
//!   history per instance (oldest → newest)          cursor
//!
//!   source-0:  [ C1 ][ C2 ][ C3 ][ future ]           ▲ future (not failed)
//!   map-1:     [ C1 ][ C2 ]                           ▲ C2     (failed)
//!   sink-2:    [ C1 ][ C2 ][ C3 ][ future ]           ▲ future
//!
//!   repeat until nothing moves:
//!     for each instance, while its selected entry depends on a peer checkpoint X
//!     and the peer's cursor is not strictly newer than X: step the cursor down
//! ```
//!
//! Histories are immutable once built; only the per-instance cursors move, and they
//! only move down, so the loop terminates on any graph including cyclic ones. The
//! resulting line is the newest consistent one reachable from the starting cursors.
//!
//! Instances that end on their synthetic *future* entry need no rollback and are left
//! out of the resulting [`RecoveryLine`].

use crate::checkpoint::{CheckpointId, Dependencies, Metadata};
use crate::error::{CheckpointError, Result};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Checkpoint to restore, per instance
///
/// Instances that are absent, or mapped to the nil id, need no restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryLine {
    recovery_map: BTreeMap<String, CheckpointId>,
}

impl RecoveryLine {
    pub fn new(recovery_map: BTreeMap<String, CheckpointId>) -> Self {
        Self { recovery_map }
    }

    pub fn recovery_map(&self) -> &BTreeMap<String, CheckpointId> {
        &self.recovery_map
    }

    /// Selected checkpoint for `instance`, if it must restore one
    pub fn checkpoint_for(&self, instance: &str) -> Option<CheckpointId> {
        self.recovery_map
            .get(instance)
            .copied()
            .filter(|id| !id.is_nil())
    }

    /// Instances that must restore a checkpoint
    pub fn affected_workers(&self) -> Vec<&str> {
        self.recovery_map
            .iter()
            .filter(|(_, id)| !id.is_nil())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CheckpointId)> {
        self.recovery_map.iter()
    }

    pub fn len(&self) -> usize {
        self.recovery_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recovery_map.is_empty()
    }
}

impl FromIterator<(String, CheckpointId)> for RecoveryLine {
    fn from_iter<I: IntoIterator<Item = (String, CheckpointId)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// One candidate in an instance's history
struct Entry {
    id: CheckpointId,
    dependencies: Dependencies,
    synthetic: bool,
}

/// Immutable candidates of one instance plus the moving selection
struct Candidates {
    entries: Vec<Entry>,
    positions: HashMap<CheckpointId, usize>,
    cursor: usize,
}

impl Candidates {
    fn selected(&self) -> &Entry {
        &self.entries[self.cursor]
    }
}

/// Computes recovery lines over a fixed set of checkpoint metadata
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use dataflow_checkpoint::{
///     CheckpointId, Dependencies, InstanceGraph, Metadata, RecoveryLineCalculator,
/// };
///
/// let source = Metadata::new(
///     CheckpointId::new(), "source", Utc::now(), CheckpointId::nil(), Dependencies::new(),
/// )?;
/// let mut deps = Dependencies::new();
/// deps.insert("source".to_string(), source.id);
/// let sink = Metadata::new(CheckpointId::new(), "sink", Utc::now(), CheckpointId::nil(), deps)?;
///
/// let graph = InstanceGraph::new().with_connection("source", "sink");
/// let calculator = RecoveryLineCalculator::new(vec![source.clone(), sink], &graph)?;
///
/// // The sink consumed messages sent after `source` checkpointed, so it rolls back too:
/// // it has nothing older to roll back to.
/// assert!(calculator.calculate(["source"]).is_err());
/// # Ok::<(), dataflow_checkpoint::CheckpointError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RecoveryLineCalculator {
    histories: BTreeMap<String, Vec<Metadata>>,
    upstream: BTreeMap<String, BTreeSet<String>>,
    reuse_runtime_state: bool,
}

impl RecoveryLineCalculator {
    /// Group and order the metadata, and capture the graph's inbound edges
    ///
    /// Every instance of the graph and every metadata owner gets a history; histories are
    /// ordered by creation time with ties broken by id.
    pub fn new<T>(metadata: Vec<Metadata>, topology: &T) -> Result<Self>
    where
        T: Topology + ?Sized,
    {
        let mut seen = HashSet::new();
        let mut histories: BTreeMap<String, Vec<Metadata>> = BTreeMap::new();

        for instance in topology.instances() {
            histories.entry(instance).or_default();
        }

        for m in metadata {
            m.validate()?;
            if !seen.insert(m.id) {
                return Err(CheckpointError::Precondition(format!(
                    "checkpoint {} appears more than once",
                    m.id
                )));
            }
            histories.entry(m.instance_name.clone()).or_default().push(m);
        }

        for history in histories.values_mut() {
            history.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        }

        let upstream = histories
            .keys()
            .map(|name| (name.clone(), topology.upstream_of(name)))
            .collect();

        Ok(Self {
            histories,
            upstream,
            reuse_runtime_state: true,
        })
    }

    /// Whether surviving instances may keep their live state (the default)
    ///
    /// When disabled, every instance starts from its newest checkpoint as if it had
    /// failed, which yields the newest complete line of stored checkpoints.
    pub fn with_runtime_state_reuse(mut self, reuse: bool) -> Self {
        self.reuse_runtime_state = reuse;
        self
    }

    /// Instances known to the calculator
    pub fn instances(&self) -> impl Iterator<Item = &String> {
        self.histories.keys()
    }

    /// Retained checkpoints of `instance`, oldest first
    pub fn history(&self, instance: &str) -> &[Metadata] {
        self.histories
            .get(instance)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Newest retained checkpoint of `instance`
    pub fn latest(&self, instance: &str) -> Option<&Metadata> {
        self.history(instance).last()
    }

    /// Compute the recovery line for the given failed instances
    ///
    /// Fails with [`CheckpointError::MissingCheckpoint`] if any instance involved has no
    /// checkpoint, and with [`CheckpointError::NoConsistentLine`] if some instance would
    /// have to roll back past its oldest retained checkpoint.
    pub fn calculate<I, S>(&self, failed: I) -> Result<RecoveryLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let failed: BTreeSet<String> = failed.into_iter().map(Into::into).collect();

        let mut required: BTreeSet<&str> = self.histories.keys().map(String::as_str).collect();
        required.extend(failed.iter().map(String::as_str));

        for instance in &required {
            if self.history(instance).is_empty() {
                return Err(CheckpointError::MissingCheckpoint(instance.to_string()));
            }
        }

        let mut arena: BTreeMap<&str, Candidates> = BTreeMap::new();
        for instance in &required {
            arena.insert(*instance, self.candidates(instance, failed.contains(*instance)));
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut moved = false;
            for instance in &required {
                while let Some((peer, depended)) = Self::unsatisfied(&arena, instance) {
                    let candidates = arena
                        .get_mut(instance)
                        .ok_or_else(|| CheckpointError::MissingCheckpoint(instance.to_string()))?;
                    if candidates.cursor == 0 {
                        warn!(
                            "Instance {} cannot roll back past its oldest checkpoint {}",
                            instance,
                            candidates.selected().id
                        );
                        return Err(CheckpointError::NoConsistentLine(instance.to_string()));
                    }
                    debug!(
                        "Rolling back {} from {} (depends on {}:{})",
                        instance,
                        candidates.selected().id,
                        peer,
                        depended
                    );
                    candidates.cursor -= 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }

        let line: RecoveryLine = arena
            .iter()
            .filter(|(_, c)| !c.selected().synthetic)
            .map(|(name, c)| (name.to_string(), c.selected().id))
            .collect();

        info!(
            "Recovery line for failed {:?}: {} of {} instances restore ({} rounds)",
            failed,
            line.len(),
            required.len(),
            rounds
        );
        Ok(line)
    }

    /// Checkpoints strictly older than the line's selection, per affected instance
    ///
    /// Once a line has been computed with every instance failed, nothing older than it
    /// can ever be selected again.
    pub fn superseded_by(&self, line: &RecoveryLine) -> Vec<&Metadata> {
        let mut superseded = Vec::new();
        for (instance, id) in line.iter() {
            let history = self.history(instance);
            if let Some(position) = history.iter().position(|m| m.id == *id) {
                superseded.extend(history[..position].iter());
            }
        }
        superseded
    }

    fn candidates(&self, instance: &str, failed: bool) -> Candidates {
        let history = self.history(instance);
        let mut entries: Vec<Entry> = history
            .iter()
            .map(|m| Entry {
                id: m.id,
                dependencies: m.dependencies.clone(),
                synthetic: false,
            })
            .collect();
        let positions = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id, position))
            .collect();

        if !failed && self.reuse_runtime_state {
            let mut dependencies = Dependencies::new();
            if let Some(top) = history.last() {
                dependencies.insert(instance.to_string(), top.id);
            }
            if let Some(upstream) = self.upstream.get(instance) {
                for peer in upstream {
                    if let Some(top) = self.latest(peer) {
                        dependencies.insert(peer.clone(), top.id);
                    }
                }
            }
            entries.push(Entry {
                id: CheckpointId::nil(),
                dependencies,
                synthetic: true,
            });
        }

        let cursor = entries.len().saturating_sub(1);
        Candidates {
            entries,
            positions,
            cursor,
        }
    }

    /// First dependency of the instance's selected entry the current selection violates
    fn unsatisfied(
        arena: &BTreeMap<&str, Candidates>,
        instance: &str,
    ) -> Option<(String, CheckpointId)> {
        let entry = arena.get(instance)?.selected();
        let mut peers: Vec<_> = entry.dependencies.iter().collect();
        peers.sort();

        for (peer, depended) in peers {
            if peer == instance || depended.is_nil() {
                continue;
            }
            let Some(peer_candidates) = arena.get(peer.as_str()) else {
                warn!(
                    "Checkpoint {} of {} depends on unknown instance {}",
                    entry.id, instance, peer
                );
                continue;
            };
            // Pruned from the peer's history, so older than anything it can select
            let Some(&position) = peer_candidates.positions.get(depended) else {
                continue;
            };
            if peer_candidates.cursor <= position {
                return Some((peer.clone(), *depended));
            }
        }
        None
    }
}
