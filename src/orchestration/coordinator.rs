//! Run state machine.
//!
//! ```text
//! Idle -> GraphValidated -> RunningWave(1) -> ... -> RunningWave(n) -> Completed
//!   |                                    \
//!   +-- invalid graph -------------------+-> Aborted
//! ```
//!
//! The coordinator validates the graph, peels waves off the scheduler, hands
//! each wave to the dispatcher, persists successes, applies the skip and
//! abort policy, and folds everything into one [`RunResult`].

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::core::dag::DependencyGraph;
use crate::core::task::{TaskContext, TaskRef};
use crate::error::Error;
use crate::orchestration::dispatcher::{Dispatcher, TaskOutcome};
use crate::orchestration::monitor::MonitorHandle;
use crate::orchestration::result::{RunResult, RunState};
use crate::orchestration::scheduler::{SkipDecision, WaveScheduler, ALREADY_COMPLETED};
use crate::state::CompletionStore;

/// Reason recorded for tasks whose dependencies can never be satisfied.
const UNREACHABLE: &str = "dependencies unreachable";

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    GraphValidated,
    RunningWave(usize),
    Completed,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Aborted)
    }
}

/// Drives a single run. Consumed by [`RunCoordinator::run`].
pub(crate) struct RunCoordinator<'a> {
    dispatcher: &'a Dispatcher,
    store: &'a dyn CompletionStore,
    monitor: MonitorHandle,
    strict: bool,
    phase: RunPhase,
    state: RunState,
}

impl<'a> RunCoordinator<'a> {
    pub(crate) fn new(
        dispatcher: &'a Dispatcher,
        store: &'a dyn CompletionStore,
        monitor: MonitorHandle,
        strict: bool,
    ) -> Self {
        Self {
            dispatcher,
            store,
            monitor,
            strict,
            phase: RunPhase::Idle,
            state: RunState::new(),
        }
    }

    fn transition(&mut self, next: RunPhase) {
        debug!(
            "Run {}: {:?} -> {:?}",
            self.state.run_id().short(),
            self.phase,
            next
        );
        self.phase = next;
    }

    pub(crate) async fn run(mut self, tasks: Vec<TaskRef>, context: TaskContext) -> RunResult {
        let run_id = self.state.run_id();
        info!("Run {} starting with {} tasks", run_id.short(), tasks.len());

        let graph = match DependencyGraph::build(&tasks, self.strict) {
            Ok(graph) => graph,
            Err(err) => return self.fail_configuration(err, &context),
        };
        if !graph.dropped_edges().is_empty() {
            info!(
                "Run {} continuing without {} dropped dependencies",
                run_id.short(),
                graph.dropped_edges().len()
            );
        }
        self.transition(RunPhase::GraphValidated);
        self.monitor.emit(|m| m.on_run_start(&run_id));

        let mut already_completed = Vec::new();
        for node in graph.nodes() {
            if self.store.is_completed(&node.id) {
                self.state.record_skip(&node.id, ALREADY_COMPLETED);
                self.monitor
                    .emit(|m| m.on_task_skipped(&node.id, &run_id, ALREADY_COMPLETED));
                already_completed.push(node.id.clone());
            }
        }
        if !already_completed.is_empty() {
            debug!("Run {}: {} tasks already completed", run_id.short(), already_completed.len());
        }

        let by_id: HashMap<&str, &TaskRef> = tasks.iter().map(|t| (t.id(), t)).collect();
        let mut scheduler = WaveScheduler::new(&graph, already_completed);

        while let Some(wave) = scheduler.next_wave() {
            self.transition(RunPhase::RunningWave(wave.number));
            debug!("Wave {}: {:?}", wave.number, wave.task_ids);

            let wave_tasks: Vec<TaskRef> = wave
                .task_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).map(|t| (*t).clone()))
                .collect();
            self.state.record_wave(wave.task_ids.clone());

            let outcomes = self
                .dispatcher
                .dispatch(&wave_tasks, &context, &run_id, &self.monitor)
                .await;

            let fatal = self.apply_outcomes(&mut scheduler, &outcomes);
            match fatal {
                Some(failed_id) => {
                    warn!("Run {} aborting after failure of {}", run_id.short(), failed_id);
                    let skips = scheduler.abort(&failed_id);
                    self.record_skips(skips);
                    self.transition(RunPhase::Aborted);
                    break;
                }
                None => {
                    let skips = scheduler.propagate_skips();
                    self.record_skips(skips);
                }
            }
        }

        if !self.phase.is_terminal() {
            if !scheduler.is_finished() {
                warn!(
                    "Run {}: {} tasks left without a runnable wave",
                    run_id.short(),
                    scheduler.pending_count()
                );
                let skips = scheduler.drain_pending(UNREACHABLE);
                self.record_skips(skips);
            }
            self.transition(RunPhase::Completed);
        }

        self.finish(&context)
    }

    /// Record one wave's outcomes and persist its successes.
    ///
    /// Returns the first fatal failure, in dispatch order.
    fn apply_outcomes(
        &mut self,
        scheduler: &mut WaveScheduler<'_>,
        outcomes: &[TaskOutcome],
    ) -> Option<String> {
        let mut fatal = None;
        for outcome in outcomes {
            self.state.record_outcome(outcome);
            match &outcome.result {
                Ok(()) => {
                    scheduler.record_success(&outcome.task_id);
                    if let Err(err) = self.store.mark_completed(&outcome.task_id) {
                        warn!("Failed to persist completion of {}: {}", outcome.task_id, err);
                    }
                }
                Err(err) => {
                    scheduler.record_failure(&outcome.task_id);
                    if outcome.is_fatal() {
                        warn!("Task {} failed: {}", outcome.task_id, err);
                        self.state.record_fatal(&outcome.task_id);
                        fatal.get_or_insert_with(|| outcome.task_id.clone());
                    } else {
                        info!("Task {} failed (continuing): {}", outcome.task_id, err);
                    }
                }
            }
        }
        fatal
    }

    fn record_skips(&mut self, skips: Vec<SkipDecision>) {
        let run_id = self.state.run_id();
        for skip in skips {
            debug!("Skipping {}: {}", skip.task_id, skip.reason);
            self.state.record_skip(&skip.task_id, &skip.reason);
            self.monitor
                .emit(|m| m.on_task_skipped(&skip.task_id, &run_id, &skip.reason));
        }
    }

    fn fail_configuration(mut self, err: Error, context: &TaskContext) -> RunResult {
        let run_id = self.state.run_id();
        let offending = match &err {
            Error::UnknownDependency { task, .. } => Some(task.clone()),
            Error::DependencyCycle { path } => path.first().cloned(),
            _ => None,
        };
        if err.is_configuration() {
            warn!("Run {} has an invalid graph: {}", run_id.short(), err);
        } else {
            warn!("Run {} could not build its graph: {}", run_id.short(), err);
        }

        self.monitor.emit(|m| m.on_run_start(&run_id));
        self.state.record_configuration_error(err.to_string(), offending);
        self.transition(RunPhase::Aborted);
        self.finish(context)
    }

    fn finish(self, context: &TaskContext) -> RunResult {
        let run_id = self.state.run_id();
        let success = self.state.is_successful();
        let result = self.state.finish(context.snapshot());
        info!(
            "Run {} finished: success={} executed={} skipped={}",
            run_id.short(),
            success,
            result.ordered_task_ids().len(),
            result.skipped_task_ids().len()
        );
        self.monitor.emit(|m| m.on_run_finished(&run_id, success));
        result
    }
}
