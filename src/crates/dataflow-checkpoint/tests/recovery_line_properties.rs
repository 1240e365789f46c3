//! Property tests: computed recovery lines are free of orphan messages on arbitrary graphs

mod common;

use common::GraphHistory;
use dataflow_checkpoint::{InstanceGraph, RecoveryLine, RecoveryLineCalculator, Topology};
use proptest::prelude::*;

fn name(index: usize) -> String {
    format!("instance{}", index)
}

/// Random graph of `n` instances (self loops dropped, cycles allowed) plus a checkpoint
/// schedule and a non-empty failed set
fn scenario() -> impl Strategy<Value = (GraphHistory, Vec<String>)> {
    (2usize..=6).prop_flat_map(|n| {
        (
            prop::collection::vec((0..n, 0..n), 0..12),
            prop::collection::vec(0..n, 0..24),
            1u32..(1u32 << n),
        )
            .prop_map(move |(edges, schedule, failed_mask)| {
                let mut graph = InstanceGraph::new();
                for i in 0..n {
                    graph.add_instance(name(i));
                }
                for (from, to) in edges {
                    if from != to {
                        graph.add_connection(name(from), name(to));
                    }
                }

                let mut history = GraphHistory::new(graph);
                history.initial_checkpoints();
                for i in schedule {
                    history.checkpoint(&name(i));
                }

                let failed = (0..n)
                    .filter(|i| failed_mask & (1 << i) != 0)
                    .map(name)
                    .collect();
                (history, failed)
            })
    })
}

/// Position of the instance's selection; instances left out of the line keep their live
/// state, which is newer than every checkpoint they have
fn selected_position(calculator: &RecoveryLineCalculator, line: &RecoveryLine, instance: &str) -> usize {
    let history = calculator.history(instance);
    match line.checkpoint_for(instance) {
        Some(id) => history
            .iter()
            .position(|m| m.id == id)
            .unwrap_or_else(|| panic!("{} selected unknown checkpoint {}", instance, id)),
        None => history.len(),
    }
}

fn assert_no_orphans(
    calculator: &RecoveryLineCalculator,
    graph: &InstanceGraph,
    line: &RecoveryLine,
) -> Result<(), TestCaseError> {
    for instance in graph.instances() {
        let Some(id) = line.checkpoint_for(&instance) else {
            // Live state has consumed everything upstream has sent so far
            for peer in graph.upstream_of(&instance) {
                prop_assert!(
                    line.checkpoint_for(&peer).is_none(),
                    "{} keeps running but upstream {} rolls back",
                    instance,
                    peer
                );
            }
            continue;
        };

        let metadata = calculator
            .history(&instance)
            .iter()
            .find(|m| m.id == id)
            .unwrap_or_else(|| panic!("{} selected unknown checkpoint", instance));
        for (peer, depended) in metadata.peer_dependencies() {
            let Some(position) = calculator.history(peer).iter().position(|m| m.id == *depended)
            else {
                continue;
            };
            prop_assert!(
                selected_position(calculator, line, peer) > position,
                "{} at {} depends on {}:{} which is rolled back",
                instance,
                id,
                peer,
                depended
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn recovery_line_is_consistent((history, failed) in scenario()) {
        let calculator = history.calculator();
        let line = calculator
            .calculate(failed.iter().cloned())
            .unwrap_or_else(|e| panic!("initial checkpoints always form a line: {e}"));

        for instance in &failed {
            prop_assert!(line.checkpoint_for(instance).is_some(), "failed {} not restored", instance);
        }
        assert_no_orphans(&calculator, &history.graph, &line)?;
    }

    #[test]
    fn stored_line_restores_every_instance((history, failed) in scenario()) {
        let calculator = history.calculator().with_runtime_state_reuse(false);
        let line = calculator
            .calculate(failed.iter().cloned())
            .unwrap_or_else(|e| panic!("initial checkpoints always form a line: {e}"));

        prop_assert_eq!(line.affected_workers().len(), history.graph.instances().len());
        assert_no_orphans(&calculator, &history.graph, &line)?;

        let everyone: Vec<String> = history.graph.instances().into_iter().collect();
        let all_failed = calculator.calculate(everyone).unwrap();
        prop_assert_eq!(line, all_failed);
    }

    #[test]
    fn live_state_never_rolls_back_further((history, failed) in scenario()) {
        let calculator = history.calculator();
        let reused = calculator.calculate(failed.iter().cloned()).unwrap();
        let stored = calculator
            .clone()
            .with_runtime_state_reuse(false)
            .calculate(failed.iter().cloned())
            .unwrap();

        for instance in history.graph.instances() {
            prop_assert!(
                selected_position(&calculator, &reused, &instance)
                    >= selected_position(&calculator, &stored, &instance),
                "{} rolled back further when reusing live state",
                instance
            );
        }
    }
}
