//! Core domain models: the task contract, the registry and the
//! dependency graph.

pub mod dag;
pub mod registry;
pub mod task;

pub use dag::{DependencyGraph, DropReason, DroppedEdge, TaskNode};
pub use registry::TaskRegistry;
pub use task::{
    AsyncFnTask, AsyncTask, Completion, ExecutionMode, FnTask, OrchestratorTask, TaskContext,
    TaskHooks, TaskRef, TaskResult, TaskSpec,
};
