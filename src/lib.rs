pub mod config;
pub mod error;
pub mod log;
pub mod util;

// Engine
pub mod core;
pub mod orchestration;
pub mod state;

pub mod demo;

pub use config::OrchestratorConfig;
pub use crate::core::task::{
    AsyncFnTask, AsyncTask, Completion, ExecutionMode, FnTask, OrchestratorTask, TaskContext,
    TaskHooks, TaskRef, TaskResult,
};
pub use error::{Error, Result, TaskError};
pub use orchestration::{
    ExecutionLane, LoggingMonitor, Monitor, Orchestrator, RunId, RunPhase, RunResult,
};
pub use state::{CompletionStore, InMemoryCompletionStore, JsonFileCompletionStore};
