//! Orchestration layer: wave scheduling, dispatch across execution lanes and
//! the concurrent pool, the run state machine, and lifecycle monitoring.

mod coordinator;
pub mod dispatcher;
mod lane;
mod monitor;
mod orchestrator;
mod result;
pub mod scheduler;

pub use coordinator::RunPhase;
pub use dispatcher::{wait_for_completion, Dispatcher, TaskOutcome};
pub use lane::ExecutionLane;
pub use monitor::{LoggingMonitor, Monitor, MonitorHandle};
pub use orchestrator::Orchestrator;
pub use result::{RunId, RunResult};
pub use scheduler::{SkipDecision, Wave, WaveScheduler};
