//! Monitor lifecycle events.

use crate::fixtures::*;
use taskwave::{LoggingMonitor, Monitor};
use std::sync::Arc;

#[test]
fn test_serial_chain_event_order() {
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator(vec![ok("T1", &[]).into_ref(), ok("T2", &["T1"]).into_ref()]);
    let _attached = attach(&mut orch, &monitor);

    let result = orch.run(None);
    assert!(result.success());
    assert_eq!(
        monitor.events(),
        vec![
            Event::RunStart,
            Event::WillStart("T1".into()),
            Event::Finished("T1".into(), true),
            Event::WillStart("T2".into()),
            Event::Finished("T2".into(), true),
            Event::RunFinished(true),
        ]
    );
    assert!(monitor.run_ids().iter().all(|id| *id == result.run_id()));
}

#[test]
fn test_skip_events_follow_run_start() {
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator(vec![
        failing("A", &[], "down").into_ref(),
        ok("B", &["A"]).into_ref(),
    ]);
    let _attached = attach(&mut orch, &monitor);
    orch.run(None);

    assert_eq!(
        monitor.events(),
        vec![
            Event::RunStart,
            Event::WillStart("A".into()),
            Event::Finished("A".into(), false),
            Event::Skipped("B".into(), "upstream dependency failed: A".into()),
            Event::RunFinished(false),
        ]
    );
}

#[test]
fn test_configuration_error_emits_start_and_finish_only() {
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator(vec![ok("A", &["B"]).into_ref(), ok("B", &["A"]).into_ref()]);
    let _attached = attach(&mut orch, &monitor);
    orch.run(None);

    assert_eq!(
        monitor.events(),
        vec![Event::RunStart, Event::RunFinished(false)]
    );
}

#[test]
fn test_dropped_monitor_does_not_affect_run() {
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator(vec![ok("a", &[]).into_ref()]);
    let attached = attach(&mut orch, &monitor);
    drop(attached);
    drop(monitor);

    assert!(orch.run(None).success());
}

#[test]
fn test_each_run_gets_a_fresh_id() {
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator(vec![ok("a", &[]).into_ref()]);
    let _attached = attach(&mut orch, &monitor);

    let first = orch.run(None);
    let second = orch.run(None);
    assert_ne!(first.run_id(), second.run_id());
}

#[test]
fn test_logging_monitor_renders_run() {
    let logger = Arc::new(LoggingMonitor::new("it"));
    let monitor: Arc<dyn Monitor> = logger.clone();
    let mut orch = orchestrator(vec![ok("a", &[]).into_ref()]);
    orch.set_monitor(&monitor);
    orch.run(None);

    let lines = logger.lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1], "[it] -> a");
    assert!(lines[2].starts_with("[it] <- a success=true cost="));
    assert!(lines[3].ends_with("success=true"));
}
