//! Common test utilities: build checkpoint histories over an instance graph

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dataflow_checkpoint::{
    CheckpointId, Dependencies, InstanceGraph, Metadata, RecoveryLine, RecoveryLineCalculator,
    Result, Topology,
};
use std::collections::HashMap;

/// Records checkpoints the way instances would take them over a fixed graph
///
/// A shared logical clock advances on every checkpoint, so histories are ordered the way
/// the checkpoints were added.
#[derive(Debug)]
pub struct GraphHistory {
    pub graph: InstanceGraph,
    metadata: Vec<Metadata>,
    latest: HashMap<String, CheckpointId>,
    clock: i64,
}

impl GraphHistory {
    pub fn new(graph: InstanceGraph) -> Self {
        Self {
            graph,
            metadata: Vec::new(),
            latest: HashMap::new(),
            clock: 1_700_000_000,
        }
    }

    /// Give every instance a first checkpoint with no peer dependencies
    pub fn initial_checkpoints(&mut self) -> HashMap<String, CheckpointId> {
        self.graph
            .instances()
            .into_iter()
            .map(|name| {
                let id = self.checkpoint_with(&name, &[]);
                (name, id)
            })
            .collect()
    }

    /// Checkpoint that depends on the newest checkpoint of every direct upstream peer
    pub fn checkpoint(&mut self, instance: &str) -> CheckpointId {
        let peers: Vec<(String, CheckpointId)> = self
            .graph
            .upstream_of(instance)
            .into_iter()
            .filter_map(|peer| self.latest.get(&peer).map(|id| (peer, *id)))
            .collect();
        let peers: Vec<(&str, CheckpointId)> =
            peers.iter().map(|(name, id)| (name.as_str(), *id)).collect();
        self.checkpoint_with(instance, &peers)
    }

    /// Checkpoint with explicit peer dependencies
    pub fn checkpoint_with(&mut self, instance: &str, peers: &[(&str, CheckpointId)]) -> CheckpointId {
        self.clock += 1;
        let previous = self.latest.get(instance).copied().unwrap_or_default();
        let peers: Dependencies = peers
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect();
        let metadata = Metadata::new(CheckpointId::new(), instance, at(self.clock), previous, peers)
            .expect("valid test metadata");
        let id = metadata.id;
        self.latest.insert(instance.to_string(), id);
        self.metadata.push(metadata);
        id
    }

    pub fn latest(&self, instance: &str) -> CheckpointId {
        self.latest.get(instance).copied().unwrap_or_default()
    }

    pub fn metadata(&self) -> &[Metadata] {
        &self.metadata
    }

    pub fn calculator(&self) -> RecoveryLineCalculator {
        RecoveryLineCalculator::new(self.metadata.clone(), &self.graph).expect("valid history")
    }

    pub fn recover(&self, failed: &[&str]) -> Result<RecoveryLine> {
        self.calculator().calculate(failed.iter().copied())
    }

    /// Recovery line that ignores live state, as if every instance had failed
    pub fn recover_from_checkpoints_only(&self, failed: &[&str]) -> Result<RecoveryLine> {
        self.calculator()
            .with_runtime_state_reuse(false)
            .calculate(failed.iter().copied())
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// 1 -> 2 -> 3
pub fn line_graph() -> InstanceGraph {
    InstanceGraph::new()
        .with_connection("instance1", "instance2")
        .with_connection("instance2", "instance3")
}

/// 1 -> 2 -> 3 -> 4 with a backchannel 3 -> 2
pub fn cycle_graph() -> InstanceGraph {
    InstanceGraph::new()
        .with_connection("instance1", "instance2")
        .with_connection("instance2", "instance3")
        .with_connection("instance3", "instance4")
        .with_connection("instance3", "instance2")
}

/// 1 forks to 2 and 3, which join in 4
pub fn fork_join_graph() -> InstanceGraph {
    InstanceGraph::new()
        .with_connection("instance1", "instance2")
        .with_connection("instance1", "instance3")
        .with_connection("instance2", "instance4")
        .with_connection("instance3", "instance4")
}
