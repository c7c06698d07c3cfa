//! Task contract and the shared run context.
//!
//! Every task implements the synchronous [`OrchestratorTask::execute`].
//! The asynchronous contract and the prepare/cancel hooks are optional
//! capabilities, queried by the dispatcher at dispatch time through
//! [`OrchestratorTask::as_async`] and [`OrchestratorTask::hooks`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::error::TaskError;

/// Outcome of a single task invocation.
pub type TaskResult = std::result::Result<(), TaskError>;

/// Which execution context runs a task and whether it may overlap with others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One at a time on the serial lane.
    #[default]
    Serial,
    /// One at a time on the designated main lane.
    Main,
    /// In parallel on the blocking pool, bounded by the concurrency limit.
    Concurrent,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Serial => write!(f, "serial"),
            ExecutionMode::Main => write!(f, "main"),
            ExecutionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Mutable key/value context shared by every task of a run.
///
/// Cloning yields another handle to the same storage. Each accessor takes
/// the lock for the duration of the call only; use [`TaskContext::update`]
/// when several keys must change together. Two concurrent tasks of the same
/// wave writing the same key race, so they should use disjoint keys.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(values)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        // A panicking task must not take the context down with it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.lock()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.lock().get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.lock().get(key).and_then(Value::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Insert a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Run `f` with exclusive access to the whole map.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }
}

/// One-shot completion handle for the asynchronous task contract.
///
/// Consumed by [`Completion::complete`], so a task can signal at most once.
/// Dropping it without signalling is reported as
/// [`TaskError::CompletionDropped`].
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<TaskResult>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<TaskResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn complete(self, result: TaskResult) {
        // The dispatcher may have stopped waiting after a wave timeout.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, message: impl Into<String>) {
        self.complete(Err(TaskError::execution(message)));
    }
}

/// Asynchronous execution contract.
///
/// `execute_async` should return promptly and signal the completion later,
/// from any thread.
pub trait AsyncTask: Send + Sync {
    fn execute_async(&self, context: TaskContext, completion: Completion);
}

/// Optional lifecycle hooks.
pub trait TaskHooks: Send + Sync {
    /// Called immediately before either execution contract.
    fn prepare(&self, _context: &TaskContext) {}

    /// Best-effort cancellation, called when a concurrent task times out.
    fn cancel(&self) {}
}

/// A unit of work registered with the orchestrator.
pub trait OrchestratorTask: Send + Sync {
    fn id(&self) -> &str;

    /// Higher runs first within a wave.
    fn priority(&self) -> i64 {
        0
    }

    fn dependencies(&self) -> &[String] {
        &[]
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Serial
    }

    /// Whether unrelated branches keep running after this task fails.
    fn continue_on_failure(&self) -> bool {
        false
    }

    /// Synchronous contract. Always available.
    fn execute(&self, context: &TaskContext) -> TaskResult;

    /// Asynchronous contract, when the task has one.
    fn as_async(&self) -> Option<&dyn AsyncTask> {
        None
    }

    fn hooks(&self) -> Option<&dyn TaskHooks> {
        None
    }
}

/// Shared handle to a registered task.
pub type TaskRef = Arc<dyn OrchestratorTask>;

/// Static scheduling attributes shared by the closure-backed tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: String,
    pub priority: i64,
    pub dependencies: Vec<String>,
    pub mode: ExecutionMode,
    pub continue_on_failure: bool,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

type PrepareFn = Box<dyn Fn(&TaskContext) + Send + Sync>;
type CancelFn = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct HookFns {
    prepare: Option<PrepareFn>,
    cancel: Option<CancelFn>,
}

impl HookFns {
    fn is_set(&self) -> bool {
        self.prepare.is_some() || self.cancel.is_some()
    }
}

impl TaskHooks for HookFns {
    fn prepare(&self, context: &TaskContext) {
        if let Some(prepare) = &self.prepare {
            prepare(context);
        }
    }

    fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel();
        }
    }
}

macro_rules! task_builder_methods {
    () => {
        pub fn with_priority(mut self, priority: i64) -> Self {
            self.spec.priority = priority;
            self
        }

        pub fn depends_on<I, S>(mut self, ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.spec.dependencies.extend(ids.into_iter().map(Into::into));
            self
        }

        pub fn mode(mut self, mode: ExecutionMode) -> Self {
            self.spec.mode = mode;
            self
        }

        pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
            self.spec.continue_on_failure = continue_on_failure;
            self
        }

        pub fn on_prepare(mut self, f: impl Fn(&TaskContext) + Send + Sync + 'static) -> Self {
            self.hooks.prepare = Some(Box::new(f));
            self
        }

        pub fn on_cancel(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
            self.hooks.cancel = Some(Box::new(f));
            self
        }

        pub fn spec(&self) -> &TaskSpec {
            &self.spec
        }

        pub fn into_ref(self) -> TaskRef {
            Arc::new(self)
        }
    };
}

/// Task backed by a synchronous closure.
///
/// ```ignore
/// let task = FnTask::new("load", |ctx| {
///     ctx.set("loaded", true);
///     Ok(())
/// })
/// .with_priority(10)
/// .depends_on(["config"]);
/// ```
pub struct FnTask {
    spec: TaskSpec,
    body: Box<dyn Fn(&TaskContext) -> TaskResult + Send + Sync>,
    hooks: HookFns,
}

impl FnTask {
    pub fn new(
        id: impl Into<String>,
        body: impl Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            spec: TaskSpec::new(id),
            body: Box::new(body),
            hooks: HookFns::default(),
        }
    }

    task_builder_methods!();
}

impl std::fmt::Debug for FnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("spec", &self.spec).finish()
    }
}

impl OrchestratorTask for FnTask {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn priority(&self) -> i64 {
        self.spec.priority
    }

    fn dependencies(&self) -> &[String] {
        &self.spec.dependencies
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.spec.mode
    }

    fn continue_on_failure(&self) -> bool {
        self.spec.continue_on_failure
    }

    fn execute(&self, context: &TaskContext) -> TaskResult {
        (self.body)(context)
    }

    fn hooks(&self) -> Option<&dyn TaskHooks> {
        self.hooks.is_set().then_some(&self.hooks as &dyn TaskHooks)
    }
}

/// Task backed by a closure that signals a [`Completion`].
///
/// The synchronous contract is provided by waiting on the completion, so the
/// closure never manages its own blocking primitive.
pub struct AsyncFnTask {
    spec: TaskSpec,
    body: Box<dyn Fn(TaskContext, Completion) + Send + Sync>,
    hooks: HookFns,
}

impl AsyncFnTask {
    pub fn new(
        id: impl Into<String>,
        body: impl Fn(TaskContext, Completion) + Send + Sync + 'static,
    ) -> Self {
        Self {
            spec: TaskSpec::new(id),
            body: Box::new(body),
            hooks: HookFns::default(),
        }
    }

    task_builder_methods!();
}

impl std::fmt::Debug for AsyncFnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTask").field("spec", &self.spec).finish()
    }
}

impl AsyncTask for AsyncFnTask {
    fn execute_async(&self, context: TaskContext, completion: Completion) {
        (self.body)(context, completion)
    }
}

impl OrchestratorTask for AsyncFnTask {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn priority(&self) -> i64 {
        self.spec.priority
    }

    fn dependencies(&self) -> &[String] {
        &self.spec.dependencies
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.spec.mode
    }

    fn continue_on_failure(&self) -> bool {
        self.spec.continue_on_failure
    }

    fn execute(&self, context: &TaskContext) -> TaskResult {
        crate::orchestration::dispatcher::wait_for_completion(self, context.clone())
    }

    fn as_async(&self) -> Option<&dyn AsyncTask> {
        Some(self)
    }

    fn hooks(&self) -> Option<&dyn TaskHooks> {
        self.hooks.is_set().then_some(&self.hooks as &dyn TaskHooks)
    }
}
