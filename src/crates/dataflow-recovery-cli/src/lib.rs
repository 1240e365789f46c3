//! # dataflow-recovery-cli
//!
//! Offline tooling over checkpoint metadata gathered from a deployed dataflow.
//!
//! A scenario file bundles the instance graph, the metadata of every retained checkpoint
//! and, optionally, the names of the failed instances:
//!
//! ```yaml
//! graph:
//!   connections:
//!     - { from: source, to: sink }
//! checkpoints:
//!   - id: "5b0c6c1e-8d5f-4a57-9a0e-0f1c3b3c2a01"
//!     instance_name: source
//!     created_at: "2026-10-18T09:00:00Z"
//!     dependencies: { source: "00000000-0000-0000-0000-000000000000" }
//! failed: [source]
//! ```

use anyhow::{bail, Context, Result};
use dataflow_checkpoint::{
    CheckpointId, InstanceGraph, Metadata, RecoveryLine, RecoveryLineCalculator, Topology,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Graph, checkpoint metadata and failed instances to analyze
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub graph: InstanceGraph,

    #[serde(default)]
    pub checkpoints: Vec<Metadata>,

    #[serde(default)]
    pub failed: Vec<String>,
}

/// Per-instance overview printed by `validate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub instance: String,
    pub checkpoints: usize,
    pub latest: CheckpointId,
    pub upstream: Vec<String>,
}

impl Scenario {
    /// Load a scenario, picking the format from the file extension (`.json`, else YAML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let scenario = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))?;

        debug!(
            "Loaded scenario with {} checkpoints from {}",
            scenario.checkpoints.len(),
            path.display()
        );
        Ok(scenario)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Calculator over the scenario's checkpoints
    pub fn calculator(&self, reuse_runtime_state: bool) -> Result<RecoveryLineCalculator> {
        let calculator = RecoveryLineCalculator::new(self.checkpoints.clone(), &self.graph)
            .context("Invalid checkpoint metadata")?;
        Ok(calculator.with_runtime_state_reuse(reuse_runtime_state))
    }

    /// Check metadata invariants and that every instance has a checkpoint
    pub fn validate(&self) -> Result<Vec<InstanceSummary>> {
        let calculator = self.calculator(true)?;

        let mut summaries = Vec::new();
        let mut missing = Vec::new();
        for instance in calculator.instances() {
            let Some(latest) = calculator.latest(instance) else {
                missing.push(instance.as_str());
                continue;
            };
            summaries.push(InstanceSummary {
                instance: instance.clone(),
                checkpoints: calculator.history(instance).len(),
                latest: latest.id,
                upstream: self.graph.upstream_of(instance).into_iter().collect(),
            });
        }
        if !missing.is_empty() {
            bail!("Instances without any checkpoint: {}", missing.join(", "));
        }

        for failed in &self.failed {
            if calculator.latest(failed).is_none() {
                bail!("Failed instance {} has no checkpoint", failed);
            }
        }
        Ok(summaries)
    }

    /// Recovery line for `failed`, or for the scenario's own failed list when empty
    pub fn compute(&self, failed: &[String], reuse_runtime_state: bool) -> Result<RecoveryLine> {
        let failed: &[String] = if failed.is_empty() {
            &self.failed
        } else {
            failed
        };
        let line = self
            .calculator(reuse_runtime_state)?
            .calculate(failed.iter().cloned())
            .context("Recovery line calculation failed")?;
        info!(
            "Recovery line restores {} instances",
            line.affected_workers().len()
        );
        Ok(line)
    }

    /// Checkpoints strictly older than the worst-case recovery line
    ///
    /// The worst case has every instance failed; no later failure can select anything
    /// older, so these checkpoints are safe to delete.
    pub fn prunable(&self) -> Result<(RecoveryLine, Vec<Metadata>)> {
        let calculator = self.calculator(false)?;
        let everyone: Vec<String> = calculator.instances().cloned().collect();
        let line = calculator
            .calculate(everyone)
            .context("Worst-case recovery line calculation failed")?;
        let prunable = calculator
            .superseded_by(&line)
            .into_iter()
            .cloned()
            .collect();
        Ok((line, prunable))
    }
}
