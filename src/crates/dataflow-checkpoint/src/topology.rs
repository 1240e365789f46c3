//! Instance graph consumed by recovery
//!
//! Edges point in the direction data flows. Cycles (backchannels) are ordinary edges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Graph topology provider
///
/// The recovery calculator only needs the instance names and, per instance, the set of
/// instances with a direct edge into it.
pub trait Topology {
    /// Every instance in the graph
    fn instances(&self) -> BTreeSet<String>;

    /// Instances with a direct edge into `instance`
    fn upstream_of(&self, instance: &str) -> BTreeSet<String>;
}

/// Directed edge `from -> to`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
}

/// Explicit adjacency data for a deployed dataflow
///
/// ```rust
/// use dataflow_checkpoint::{InstanceGraph, Topology};
///
/// let graph = InstanceGraph::new()
///     .with_connection("source", "map")
///     .with_connection("map", "sink")
///     .with_connection("sink", "map");
///
/// assert_eq!(graph.upstream_of("map").len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGraph {
    #[serde(default)]
    instances: BTreeSet<String>,

    #[serde(default)]
    connections: BTreeSet<Connection>,
}

impl InstanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance with no edges
    pub fn add_instance(&mut self, name: impl Into<String>) {
        self.instances.insert(name.into());
    }

    /// Add a directed edge, registering both endpoints
    pub fn add_connection(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.instances.insert(from.clone());
        self.instances.insert(to.clone());
        self.connections.insert(Connection { from, to });
    }

    pub fn with_instance(mut self, name: impl Into<String>) -> Self {
        self.add_instance(name);
        self
    }

    pub fn with_connection(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.add_connection(from, to);
        self
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Instances with a direct edge out of `instance`
    pub fn downstream_of(&self, instance: &str) -> BTreeSet<String> {
        self.connections
            .iter()
            .filter(|c| c.from == instance)
            .map(|c| c.to.clone())
            .collect()
    }
}

impl Topology for InstanceGraph {
    fn instances(&self) -> BTreeSet<String> {
        // Deserialized graphs may list an endpoint only in `connections`
        let mut all = self.instances.clone();
        for connection in &self.connections {
            all.insert(connection.from.clone());
            all.insert(connection.to.clone());
        }
        all
    }

    fn upstream_of(&self, instance: &str) -> BTreeSet<String> {
        self.connections
            .iter()
            .filter(|c| c.to == instance)
            .map(|c| c.from.clone())
            .collect()
    }
}
