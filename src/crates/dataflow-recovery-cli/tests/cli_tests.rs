//! Integration tests for dataflow-recovery-cli
//!
//! These tests verify the scenario tooling including:
//! - Loading YAML and JSON scenario files
//! - Validation of metadata and checkpoint coverage
//! - Recovery line computation with and without live-state reuse
//! - Prunable checkpoint listing

use chrono::{TimeZone, Utc};
use dataflow_checkpoint::{CheckpointId, Dependencies, InstanceGraph, Metadata, Topology};
use dataflow_recovery_cli::Scenario;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SOURCE_FIRST: &str = "00000000-0000-0000-0000-0000000000a1";
const SOURCE_SECOND: &str = "00000000-0000-0000-0000-0000000000a2";
const SINK_FIRST: &str = "00000000-0000-0000-0000-0000000000b1";
const SINK_SECOND: &str = "00000000-0000-0000-0000-0000000000b2";

/// source -> sink; the sink's second checkpoint consumed output of the source's second
const SCENARIO_YAML: &str = r#"graph:
  connections:
    - from: source
      to: sink
checkpoints:
  - id: "00000000-0000-0000-0000-0000000000a1"
    instance_name: source
    created_at: "2026-01-01T00:00:01Z"
    dependencies:
      source: "00000000-0000-0000-0000-000000000000"
  - id: "00000000-0000-0000-0000-0000000000b1"
    instance_name: sink
    created_at: "2026-01-01T00:00:02Z"
    dependencies:
      sink: "00000000-0000-0000-0000-000000000000"
  - id: "00000000-0000-0000-0000-0000000000a2"
    instance_name: source
    created_at: "2026-01-01T00:00:03Z"
    dependencies:
      source: "00000000-0000-0000-0000-0000000000a1"
  - id: "00000000-0000-0000-0000-0000000000b2"
    instance_name: sink
    created_at: "2026-01-01T00:00:04Z"
    dependencies:
      sink: "00000000-0000-0000-0000-0000000000b1"
      source: "00000000-0000-0000-0000-0000000000a2"
failed: [sink]
"#;

fn id(s: &str) -> CheckpointId {
    s.parse().expect("valid checkpoint id")
}

/// Helper function to write a scenario file into a fresh temp directory
fn write_scenario(name: &str, content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join(name);
    fs::write(&path, content).expect("Failed to write scenario file");
    (temp_dir, path)
}

#[test]
fn test_yaml_scenario_loads() {
    let (_dir, path) = write_scenario("scenario.yaml", SCENARIO_YAML);
    let scenario = Scenario::from_file(&path).unwrap();

    assert_eq!(scenario.checkpoints.len(), 4);
    assert_eq!(scenario.failed, vec!["sink".to_string()]);
    assert_eq!(
        scenario.graph.instances(),
        InstanceGraph::new()
            .with_connection("source", "sink")
            .instances()
    );
    assert!(scenario.graph.upstream_of("sink").contains("source"));
}

#[test]
fn test_json_scenario_round_trip() {
    let yaml = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let (_dir, path) = write_scenario("scenario.json", &serde_json::to_string(&yaml).unwrap());

    let json = Scenario::from_file(&path).unwrap();
    assert_eq!(json, yaml);
}

#[test]
fn test_missing_file_reports_path() {
    let err = Scenario::from_file(&PathBuf::from("/nonexistent/scenario.yaml")).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/scenario.yaml"));
}

#[test]
fn test_validate_summarizes_instances() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let summaries = scenario.validate().unwrap();

    assert_eq!(summaries.len(), 2);
    let sink = summaries.iter().find(|s| s.instance == "sink").unwrap();
    assert_eq!(sink.checkpoints, 2);
    assert_eq!(sink.latest, id(SINK_SECOND));
    assert_eq!(sink.upstream, vec!["source".to_string()]);
}

#[test]
fn test_validate_rejects_instance_without_checkpoint() {
    let mut scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    scenario.graph.add_connection("sink", "archive");

    let err = scenario.validate().unwrap_err();
    assert!(err.to_string().contains("archive"));
}

#[test]
fn test_validate_rejects_broken_metadata() {
    let mut scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    scenario.checkpoints[0].dependencies.clear();

    assert!(scenario.validate().is_err());
}

#[test]
fn test_compute_uses_file_failed_list() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let line = scenario.compute(&[], true).unwrap();

    assert_eq!(line.affected_workers(), vec!["sink"]);
    assert_eq!(line.checkpoint_for("sink"), Some(id(SINK_SECOND)));
}

#[test]
fn test_compute_failed_override_rolls_back_downstream() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let line = scenario.compute(&["source".to_string()], true).unwrap();

    assert_eq!(line.checkpoint_for("source"), Some(id(SOURCE_SECOND)));
    assert_eq!(line.checkpoint_for("sink"), Some(id(SINK_FIRST)));
}

#[test]
fn test_compute_without_reuse_restores_everyone() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let line = scenario.compute(&[], false).unwrap();

    assert_eq!(line.affected_workers(), vec!["sink", "source"]);
    assert_eq!(line.checkpoint_for("source"), Some(id(SOURCE_SECOND)));
    assert_eq!(line.checkpoint_for("sink"), Some(id(SINK_FIRST)));
}

#[test]
fn test_prunable_lists_superseded_checkpoints() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let (line, prunable) = scenario.prunable().unwrap();

    assert_eq!(line.len(), 2);
    let ids: Vec<_> = prunable.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![id(SOURCE_FIRST)]);
}

#[test]
fn test_recovery_line_serializes_as_map() {
    let scenario = Scenario::from_yaml_str(SCENARIO_YAML).unwrap();
    let line = scenario.compute(&[], true).unwrap();

    let json: serde_json::Value = serde_json::to_value(&line).unwrap();
    assert_eq!(json["sink"], SINK_SECOND);
}

#[test]
fn test_scenario_built_in_code_round_trips_through_yaml() {
    let first = Metadata::new(
        CheckpointId::new(),
        "solo",
        Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
        CheckpointId::nil(),
        Dependencies::new(),
    )
    .unwrap();
    let scenario = Scenario {
        graph: InstanceGraph::new().with_instance("solo"),
        checkpoints: vec![first.clone()],
        failed: vec!["solo".into()],
    };

    let yaml = serde_yaml::to_string(&scenario).unwrap();
    let loaded = Scenario::from_yaml_str(&yaml).unwrap();
    assert_eq!(loaded, scenario);
    assert_eq!(
        loaded.compute(&[], true).unwrap().checkpoint_for("solo"),
        Some(first.id)
    );
}
