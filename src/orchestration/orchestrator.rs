//! The orchestrator: task registration and the synchronous run surface.

use std::sync::Arc;
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::registry::TaskRegistry;
use crate::core::task::{TaskContext, TaskRef};
use crate::orchestration::coordinator::RunCoordinator;
use crate::orchestration::dispatcher::Dispatcher;
use crate::orchestration::lane::ExecutionLane;
use crate::orchestration::monitor::{Monitor, MonitorHandle};
use crate::orchestration::result::{RunResult, RunState};
use crate::state::{CompletionStore, InMemoryCompletionStore};
use crate::Result;

/// Registers tasks and runs them as dependency-ordered waves.
///
/// Owns a tokio runtime for the concurrent pool and two execution lanes, one
/// for Serial tasks and one for Main tasks. `run` blocks the caller until the
/// run finishes and always returns a [`RunResult`].
///
/// ```ignore
/// let mut orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
/// orchestrator.register(FnTask::new("config", |ctx| {
///     ctx.set("env", "prod");
///     Ok(())
/// }).into_ref())?;
/// let result = orchestrator.run(None);
/// assert!(result.success());
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: TaskRegistry,
    store: Arc<dyn CompletionStore>,
    monitor: MonitorHandle,
    dispatcher: Dispatcher,
    runtime: Option<Runtime>,
}

impl Orchestrator {
    /// # Errors
    /// - `Error::Validation` if `config` is invalid
    /// - `Error::Io` if the runtime or a lane thread cannot be started
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("taskwave-worker")
            .max_blocking_threads(config.max_background_concurrency.max(1) * 4 + 16)
            .build()?;
        let dispatcher = Dispatcher::new(
            &config,
            Arc::new(ExecutionLane::spawn("taskwave-serial")?),
            Arc::new(ExecutionLane::spawn("taskwave-main")?),
        );
        debug!(
            "Orchestrator::new max_background_concurrency={} strict={} wave_timeout={}s",
            config.max_background_concurrency,
            config.strict_dependency_check,
            config.background_wave_timeout_secs
        );

        Ok(Self {
            config,
            registry: TaskRegistry::new(),
            store: Arc::new(InMemoryCompletionStore::new()),
            monitor: MonitorHandle::none(),
            dispatcher,
            runtime: Some(runtime),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn with_store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn set_store(&mut self, store: Arc<dyn CompletionStore>) {
        self.store = store;
    }

    pub fn store(&self) -> &Arc<dyn CompletionStore> {
        &self.store
    }

    /// Attach a monitor without taking ownership of it.
    pub fn set_monitor(&mut self, monitor: &Arc<dyn Monitor>) {
        self.monitor = MonitorHandle::new(monitor);
    }

    pub fn clear_monitor(&mut self) {
        self.monitor = MonitorHandle::none();
    }

    /// Run Main tasks on `lane` instead of the orchestrator's own.
    ///
    /// Lets an application serialize its own Main work with the orchestrator.
    /// `run` may itself be called from that lane; Main tasks then run inline.
    pub fn with_main_lane(mut self, lane: Arc<ExecutionLane>) -> Self {
        self.dispatcher.set_main_lane(lane);
        self
    }

    pub fn main_lane(&self) -> &Arc<ExecutionLane> {
        self.dispatcher.main_lane()
    }

    /// Register a task. An existing task with the same id is replaced.
    ///
    /// # Errors
    /// Returns `Error::Validation` if the task id is empty.
    pub fn register(&mut self, task: TaskRef) -> Result<()> {
        if self.registry.register(task)?.is_some() {
            info!("Replaced previously registered task");
        }
        Ok(())
    }

    pub fn clear_all(&mut self) {
        debug!("Orchestrator: clearing {} tasks", self.registry.len());
        self.registry.clear();
    }

    pub fn task_ids(&self) -> &[String] {
        self.registry.ids()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Run every registered task and wait for the result.
    ///
    /// Safe to call from inside another tokio runtime; the run then happens
    /// on a helper thread.
    pub fn run(&self, initial_context: Option<TaskContext>) -> RunResult {
        let context = initial_context.unwrap_or_default();
        let Some(runtime) = self.runtime.as_ref() else {
            return internal_failure("orchestrator runtime has been shut down");
        };

        if Handle::try_current().is_err() {
            return runtime.block_on(self.run_async(context));
        }

        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name("taskwave-run".to_string())
                .spawn_scoped(scope, || runtime.block_on(self.run_async(context)));
            match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| internal_failure("orchestrator run thread panicked")),
                Err(err) => internal_failure(&format!("failed to start run thread: {}", err)),
            }
        })
    }

    /// Run on the caller's tokio runtime.
    pub async fn run_async(&self, context: TaskContext) -> RunResult {
        let tasks = self.registry.snapshot();
        RunCoordinator::new(
            &self.dispatcher,
            self.store.as_ref(),
            self.monitor.clone(),
            self.config.strict_dependency_check,
        )
        .run(tasks, context)
        .await
    }
}

/// A failed result for a run that could not be driven at all.
fn internal_failure(message: &str) -> RunResult {
    warn!("Run failed before scheduling: {}", message);
    let mut state = RunState::new();
    state.record_configuration_error(message.to_string(), None);
    state.finish(Default::default())
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Timed-out tasks may still be running on the pool.
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("tasks", &self.registry.ids())
            .field("monitor", &self.monitor)
            .field("dispatcher", &self.dispatcher)
            .field("main_lane", &self.main_lane().name())
            .finish()
    }
}
