//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building orchestrators with small, fast configurations
//! - Recording monitor events in order
//! - Predefined task shapes (no-op, failing, sleeping)

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use taskwave::{
    ExecutionMode, FnTask, Monitor, Orchestrator, OrchestratorConfig, RunId, TaskError, TaskRef,
};

/// One lifecycle event, as seen by [`RecordingMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RunStart,
    WillStart(String),
    Skipped(String, String),
    Finished(String, bool),
    RunFinished(bool),
}

/// Monitor that records every event in arrival order.
#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<Event>>,
    run_ids: Mutex<Vec<RunId>>,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.run_ids.lock().unwrap().clone()
    }

    fn push(&self, event: Event, run_id: &RunId) {
        self.events.lock().unwrap().push(event);
        self.run_ids.lock().unwrap().push(*run_id);
    }
}

impl Monitor for RecordingMonitor {
    fn on_run_start(&self, run_id: &RunId) {
        self.push(Event::RunStart, run_id);
    }

    fn on_task_will_start(&self, task_id: &str, run_id: &RunId) {
        self.push(Event::WillStart(task_id.to_string()), run_id);
    }

    fn on_task_skipped(&self, task_id: &str, run_id: &RunId, reason: &str) {
        self.push(Event::Skipped(task_id.to_string(), reason.to_string()), run_id);
    }

    fn on_task_finished(
        &self,
        task_id: &str,
        run_id: &RunId,
        success: bool,
        _duration_ms: f64,
        _error: Option<&TaskError>,
    ) {
        self.push(Event::Finished(task_id.to_string(), success), run_id);
    }

    fn on_run_finished(&self, run_id: &RunId, success: bool) {
        self.push(Event::RunFinished(success), run_id);
    }
}

/// Attach `monitor` to `orchestrator`; the caller keeps ownership.
pub fn attach(orchestrator: &mut Orchestrator, monitor: &Arc<RecordingMonitor>) -> Arc<dyn Monitor> {
    let monitor: Arc<dyn Monitor> = monitor.clone();
    orchestrator.set_monitor(&monitor);
    monitor
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_max_background_concurrency(4)
        .with_background_wave_timeout_secs(5.0)
}

pub fn orchestrator_with(config: OrchestratorConfig, tasks: Vec<TaskRef>) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(config).expect("Failed to create orchestrator");
    for task in tasks {
        orchestrator.register(task).expect("Failed to register task");
    }
    orchestrator
}

pub fn orchestrator(tasks: Vec<TaskRef>) -> Orchestrator {
    orchestrator_with(config(), tasks)
}

/// A task that succeeds immediately.
pub fn ok(id: &str, deps: &[&str]) -> FnTask {
    FnTask::new(id, |_| Ok(())).depends_on(deps.iter().copied())
}

/// A task that always fails with `message`.
pub fn failing(id: &str, deps: &[&str], message: &'static str) -> FnTask {
    FnTask::new(id, move |_| Err(TaskError::execution(message))).depends_on(deps.iter().copied())
}

/// A concurrent task that sleeps for `millis`.
pub fn sleeper(id: &str, millis: u64) -> FnTask {
    FnTask::new(id, move |_| {
        thread::sleep(Duration::from_millis(millis));
        Ok(())
    })
    .mode(ExecutionMode::Concurrent)
}

/// Position of `id` in `ordered`, panicking if absent.
pub fn position(ordered: &[String], id: &str) -> usize {
    ordered
        .iter()
        .position(|t| t == id)
        .unwrap_or_else(|| panic!("{} not in {:?}", id, ordered))
}
