//! Lifecycle observers.
//!
//! A monitor only observes a run; nothing it does changes the outcome.
//! The orchestrator holds it weakly, so a monitor dropped mid-run simply
//! stops receiving events.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{info, warn};

use crate::error::TaskError;
use crate::orchestration::result::RunId;
use crate::util::catch_panic;

/// Observer of run and task lifecycle events. Every method is optional.
pub trait Monitor: Send + Sync {
    fn on_run_start(&self, _run_id: &RunId) {}

    fn on_task_will_start(&self, _task_id: &str, _run_id: &RunId) {}

    fn on_task_skipped(&self, _task_id: &str, _run_id: &RunId, _reason: &str) {}

    fn on_task_finished(
        &self,
        _task_id: &str,
        _run_id: &RunId,
        _success: bool,
        _duration_ms: f64,
        _error: Option<&TaskError>,
    ) {
    }

    fn on_run_finished(&self, _run_id: &RunId, _success: bool) {}
}

/// Optional, non-owning monitor reference.
#[derive(Clone, Default)]
pub struct MonitorHandle {
    inner: Option<Weak<dyn Monitor>>,
}

impl MonitorHandle {
    pub fn new(monitor: &Arc<dyn Monitor>) -> Self {
        Self {
            inner: Some(Arc::downgrade(monitor)),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Whether a live monitor is attached.
    pub fn is_attached(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Deliver one event. A missing monitor is ignored and a panicking one
    /// is logged.
    pub fn emit(&self, event: impl FnOnce(&dyn Monitor)) {
        let Some(monitor) = self.inner.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        if let Err(message) = catch_panic(|| event(monitor.as_ref())) {
            warn!("Monitor panicked while handling an event: {}", message);
        }
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Monitor that renders each event as a log line.
///
/// Lines go to `tracing` at INFO and are kept for [`LoggingMonitor::joined_logs`].
#[derive(Debug)]
pub struct LoggingMonitor {
    name: String,
    lines: Mutex<Vec<String>>,
}

impl LoggingMonitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn joined_logs(&self) -> String {
        self.lines().join("\n")
    }

    fn push(&self, line: String) {
        let line = format!("[{}] {}", self.name, line);
        info!("{}", line);
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

impl Monitor for LoggingMonitor {
    fn on_run_start(&self, run_id: &RunId) {
        self.push(format!("run start: {}", run_id));
    }

    fn on_task_will_start(&self, task_id: &str, _run_id: &RunId) {
        self.push(format!("-> {}", task_id));
    }

    fn on_task_skipped(&self, task_id: &str, _run_id: &RunId, reason: &str) {
        self.push(format!("skip {} ({})", task_id, reason));
    }

    fn on_task_finished(
        &self,
        task_id: &str,
        _run_id: &RunId,
        success: bool,
        duration_ms: f64,
        error: Option<&TaskError>,
    ) {
        let error = error.map_or_else(|| "none".to_string(), |e| e.to_string());
        self.push(format!(
            "<- {} success={} cost={:.2}ms error={}",
            task_id, success, duration_ms, error
        ));
    }

    fn on_run_finished(&self, run_id: &RunId, success: bool) {
        self.push(format!("run finish: {} success={}", run_id, success));
    }
}
