//! Wave ordering and graph validation.

use crate::fixtures::*;
use taskwave::{OrchestratorConfig, TaskError};

#[test]
fn test_every_task_runs_once_in_topological_order() {
    let edges: &[(&str, &[&str])] = &[
        ("deploy", &["build", "migrate"]),
        ("build", &["fetch"]),
        ("migrate", &["fetch", "config"]),
        ("fetch", &[]),
        ("config", &[]),
        ("notify", &["deploy"]),
    ];
    let tasks = edges
        .iter()
        .map(|(id, deps)| ok(id, deps).into_ref())
        .collect();
    let result = orchestrator(tasks).run(None);

    assert!(result.success());
    let ordered = result.ordered_task_ids();
    assert_eq!(ordered.len(), edges.len());
    for (id, deps) in edges {
        for dep in *deps {
            assert!(
                position(ordered, dep) < position(ordered, id),
                "{} must run before {} in {:?}",
                dep,
                id,
                ordered
            );
        }
    }
}

#[test]
fn test_priority_orders_within_wave() {
    let tasks = vec![
        ok("low", &[]).with_priority(1).into_ref(),
        ok("high", &[]).with_priority(50).into_ref(),
        ok("tie_first", &[]).with_priority(10).into_ref(),
        ok("tie_second", &[]).with_priority(10).into_ref(),
    ];
    let result = orchestrator(tasks).run(None);
    assert_eq!(
        result.ordered_task_ids(),
        ["high", "tie_first", "tie_second", "low"]
    );
    assert_eq!(result.waves().len(), 1);
}

#[test]
fn test_strict_cycle_runs_nothing() {
    let tasks = vec![ok("A", &["B"]).into_ref(), ok("B", &["A"]).into_ref()];
    let result = orchestrator(tasks).run(None);

    assert!(!result.success());
    assert!(result.ordered_task_ids().is_empty());
    let message = result.configuration_error().expect("cycle should be reported");
    assert!(message.contains("A") && message.contains("B"), "{}", message);
    let offending = result.failed_task_id().expect("offending task id");
    assert!(matches!(
        result.error_for(offending),
        Some(TaskError::Configuration { .. })
    ));
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let result = orchestrator(vec![ok("loop", &["loop"]).into_ref()]).run(None);
    assert!(!result.success());
    assert!(result.ordered_task_ids().is_empty());
    assert_eq!(result.failed_task_id(), Some("loop"));
}

#[test]
fn test_strict_unknown_dependency_aborts() {
    let tasks = vec![ok("a", &[]).into_ref(), ok("b", &["ghost"]).into_ref()];
    let result = orchestrator(tasks).run(None);

    assert!(!result.success());
    assert!(result.ordered_task_ids().is_empty());
    assert_eq!(result.failed_task_id(), Some("b"));
    assert!(result.configuration_error().unwrap().contains("ghost"));
}

#[test]
fn test_lenient_mode_drops_invalid_edges() {
    let config = OrchestratorConfig::default().with_strict_dependency_check(false);
    let tasks = vec![
        ok("a", &["b"]).into_ref(),
        ok("b", &["a"]).into_ref(),
        ok("c", &["ghost", "a"]).into_ref(),
    ];
    let result = orchestrator_with(config, tasks).run(None);

    assert!(result.success());
    assert!(result.configuration_error().is_none());
    let ordered = result.ordered_task_ids();
    assert_eq!(ordered.len(), 3);
    assert!(position(ordered, "a") < position(ordered, "c"));
}

#[test]
fn test_empty_registry_succeeds() {
    let result = orchestrator(Vec::new()).run(None);
    assert!(result.success());
    assert!(result.ordered_task_ids().is_empty());
    assert!(result.skipped_task_ids().is_empty());
}
