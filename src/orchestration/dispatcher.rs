//! Execution of a single wave.
//!
//! Serial and Main tasks run one at a time, in wave order, on their lanes.
//! Concurrent tasks then run on the blocking pool, at most
//! `max_background_concurrency` at once, under one shared deadline.
//!
//! Either task contract is normalized to one [`TaskResult`]: the synchronous
//! `execute` is called directly; for an asynchronous task the dispatcher
//! calls `execute_async` and waits on its one-shot completion, without a
//! bound on a lane and bounded by the wave deadline on the pool.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout_at;
use tracing::{debug, warn};

use crate::config::{OrchestratorConfig, MAX_BACKGROUND_CONCURRENCY, MAX_WAVE_TIMEOUT_SECS};
use crate::core::task::{AsyncTask, Completion, ExecutionMode, TaskContext, TaskRef, TaskResult};
use crate::error::TaskError;
use crate::orchestration::lane::ExecutionLane;
use crate::orchestration::monitor::MonitorHandle;
use crate::orchestration::result::RunId;
use crate::util::{self, catch_panic};

/// Normalized outcome of one task in a wave.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub result: TaskResult,
    pub continue_on_failure: bool,
    /// `None` when the task never obtained a slot before the deadline.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// A failure stops the run unless the task tolerates it.
    pub fn is_fatal(&self) -> bool {
        self.result.is_err() && !self.continue_on_failure
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Invoke `task`'s asynchronous contract and block until it signals.
///
/// Must be called from a thread that may block (a lane or the blocking pool).
pub fn wait_for_completion(task: &dyn AsyncTask, context: TaskContext) -> TaskResult {
    let (completion, rx) = Completion::channel();
    task.execute_async(context, completion);
    rx.blocking_recv()
        .unwrap_or(Err(TaskError::CompletionDropped))
}

/// Prepare, then run whichever contract the task exposes, on this thread.
fn invoke_blocking(task: &TaskRef, context: &TaskContext) -> TaskResult {
    catch_panic(|| {
        if let Some(hooks) = task.hooks() {
            hooks.prepare(context);
        }
        match task.as_async() {
            Some(async_task) => wait_for_completion(async_task, context.clone()),
            None => task.execute(context),
        }
    })
    .unwrap_or_else(|message| Err(TaskError::Panicked { message }))
}

/// What a concurrent task left behind on the blocking pool.
enum Invocation {
    Finished(TaskResult),
    /// Started through the asynchronous contract; the permit is held until
    /// the completion arrives.
    Pending(oneshot::Receiver<TaskResult>, OwnedSemaphorePermit),
}

fn begin_concurrent(task: &TaskRef, context: TaskContext, permit: OwnedSemaphorePermit) -> Invocation {
    let started = catch_panic(|| {
        if let Some(hooks) = task.hooks() {
            hooks.prepare(&context);
        }
        match task.as_async() {
            Some(async_task) => {
                let (completion, rx) = Completion::channel();
                async_task.execute_async(context.clone(), completion);
                Some(rx)
            }
            None => None,
        }
    });

    match started {
        Ok(Some(rx)) => Invocation::Pending(rx, permit),
        Ok(None) => {
            let result = catch_panic(|| task.execute(&context))
                .unwrap_or_else(|message| Err(TaskError::Panicked { message }));
            drop(permit);
            Invocation::Finished(result)
        }
        Err(message) => Invocation::Finished(Err(TaskError::Panicked { message })),
    }
}

/// Best-effort cancel; never waited on.
fn request_cancel(task: &TaskRef) {
    if task.hooks().is_none() {
        return;
    }
    let task = task.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(hooks) = task.hooks() {
            if let Err(message) = catch_panic(|| hooks.cancel()) {
                warn!("Cancel hook of {} panicked: {}", task.id(), message);
            }
        }
    });
}

/// Runs waves under per-mode concurrency rules.
///
/// The background slots live as long as the dispatcher, so a sync body that
/// outlives its wave's deadline still counts against later waves.
pub struct Dispatcher {
    serial_lane: Arc<ExecutionLane>,
    main_lane: Arc<ExecutionLane>,
    slots: Arc<Semaphore>,
    max_background_concurrency: usize,
    wave_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &OrchestratorConfig,
        serial_lane: Arc<ExecutionLane>,
        main_lane: Arc<ExecutionLane>,
    ) -> Self {
        let max_background_concurrency = config
            .max_background_concurrency
            .clamp(1, MAX_BACKGROUND_CONCURRENCY);
        Self {
            serial_lane,
            main_lane,
            slots: Arc::new(Semaphore::new(max_background_concurrency)),
            max_background_concurrency,
            wave_timeout: config.wave_timeout(),
        }
    }

    pub fn main_lane(&self) -> &Arc<ExecutionLane> {
        &self.main_lane
    }

    pub fn set_main_lane(&mut self, lane: Arc<ExecutionLane>) {
        self.main_lane = lane;
    }

    /// Run one wave to completion.
    ///
    /// `tasks` must already be in wave order. Outcomes come back with the
    /// Serial/Main tasks first, then the Concurrent ones, each group in
    /// wave order.
    pub async fn dispatch(
        &self,
        tasks: &[TaskRef],
        context: &TaskContext,
        run_id: &RunId,
        monitor: &MonitorHandle,
    ) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::with_capacity(tasks.len());

        for task in tasks
            .iter()
            .filter(|t| t.execution_mode() != ExecutionMode::Concurrent)
        {
            outcomes.push(self.run_on_lane(task, context, run_id, monitor).await);
        }

        let concurrent: Vec<&TaskRef> = tasks
            .iter()
            .filter(|t| t.execution_mode() == ExecutionMode::Concurrent)
            .collect();
        if !concurrent.is_empty() {
            outcomes.extend(self.run_concurrent(&concurrent, context, run_id, monitor).await);
        }

        outcomes
    }

    async fn run_on_lane(
        &self,
        task: &TaskRef,
        context: &TaskContext,
        run_id: &RunId,
        monitor: &MonitorHandle,
    ) -> TaskOutcome {
        let lane = match task.execution_mode() {
            ExecutionMode::Main => &self.main_lane,
            _ => &self.serial_lane,
        };

        monitor.emit(|m| m.on_task_will_start(task.id(), run_id));
        let started_at = Utc::now();
        let clock = Instant::now();

        let job_task = task.clone();
        let job_context = context.clone();
        let result = match lane.run(move || invoke_blocking(&job_task, &job_context)).await {
            Ok(result) => result,
            Err(err) => Err(TaskError::execution(err.to_string())),
        };

        finish(task, started_at, clock.elapsed(), result, run_id, monitor)
    }

    async fn run_concurrent(
        &self,
        tasks: &[&TaskRef],
        context: &TaskContext,
        run_id: &RunId,
        monitor: &MonitorHandle,
    ) -> Vec<TaskOutcome> {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.wave_timeout)
            .unwrap_or_else(|| now + Duration::from_secs_f64(MAX_WAVE_TIMEOUT_SECS));
        debug!(
            "Running {} concurrent tasks (limit {}, {} free, deadline {:?})",
            tasks.len(),
            self.max_background_concurrency,
            self.slots.available_permits(),
            self.wave_timeout
        );

        join_all(tasks.iter().map(|task| {
            self.run_concurrent_task(task, deadline, context, run_id, monitor)
        }))
        .await
    }

    async fn run_concurrent_task(
        &self,
        task: &TaskRef,
        deadline: tokio::time::Instant,
        context: &TaskContext,
        run_id: &RunId,
        monitor: &MonitorHandle,
    ) -> TaskOutcome {
        let seconds = self.wave_timeout.as_secs_f64();
        let not_started = || {
            warn!("Task {} did not start before the wave deadline", task.id());
            Err(TaskError::Timeout {
                seconds,
                started: false,
            })
        };

        // A task without a slot never starts, so it gets no monitor events.
        let permit = match timeout_at(deadline, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) if tokio::time::Instant::now() < deadline => permit,
            Ok(Err(_)) => {
                return never_started(task, Err(TaskError::execution("concurrency limiter closed")));
            }
            _ => return never_started(task, not_started()),
        };

        monitor.emit(|m| m.on_task_will_start(task.id(), run_id));
        let started_at = Utc::now();
        let clock = Instant::now();

        let job_task = task.clone();
        let job_context = context.clone();
        let execution = async move {
            let invocation =
                util::blocking(move || Ok(begin_concurrent(&job_task, job_context, permit))).await;
            match invocation {
                Ok(Invocation::Finished(result)) => result,
                Ok(Invocation::Pending(rx, _permit)) => {
                    rx.await.unwrap_or(Err(TaskError::CompletionDropped))
                }
                Err(err) => Err(TaskError::Panicked {
                    message: err.to_string(),
                }),
            }
        };

        let result = match timeout_at(deadline, execution).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Task {} timed out after {}s", task.id(), seconds);
                request_cancel(task);
                Err(TaskError::Timeout {
                    seconds,
                    started: true,
                })
            }
        };

        finish(task, started_at, clock.elapsed(), result, run_id, monitor)
    }
}

fn never_started(task: &TaskRef, result: TaskResult) -> TaskOutcome {
    TaskOutcome {
        task_id: task.id().to_string(),
        result,
        continue_on_failure: task.continue_on_failure(),
        started_at: None,
        finished_at: Utc::now(),
        duration: Duration::ZERO,
    }
}

fn finish(
    task: &TaskRef,
    started_at: DateTime<Utc>,
    duration: Duration,
    result: TaskResult,
    run_id: &RunId,
    monitor: &MonitorHandle,
) -> TaskOutcome {
    let outcome = TaskOutcome {
        task_id: task.id().to_string(),
        result,
        continue_on_failure: task.continue_on_failure(),
        started_at: Some(started_at),
        finished_at: Utc::now(),
        duration,
    };
    match &outcome.result {
        Ok(()) => debug!("Task {} succeeded in {:.2}ms", outcome.task_id, outcome.duration_ms()),
        Err(err) => debug!("Task {} failed: {}", outcome.task_id, err),
    }
    monitor.emit(|m| {
        m.on_task_finished(
            &outcome.task_id,
            run_id,
            outcome.is_success(),
            outcome.duration_ms(),
            outcome.result.as_ref().err(),
        )
    });
    outcome
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_background_concurrency", &self.max_background_concurrency)
            .field("free_slots", &self.slots.available_permits())
            .field("wave_timeout", &self.wave_timeout)
            .finish()
    }
}
