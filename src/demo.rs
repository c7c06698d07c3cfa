//! Demo scenarios: an app-startup pipeline, a rerun against the same
//! completion store, and a dependency cycle.

use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::core::task::{AsyncFnTask, ExecutionMode, FnTask, TaskRef};
use crate::error::TaskError;
use crate::orchestration::{LoggingMonitor, Monitor, Orchestrator, RunResult};
use crate::state::{CompletionStore, InMemoryCompletionStore};
use crate::Result;

/// Default unit of simulated work; the slowest demo task takes 12 steps.
pub const DEFAULT_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// One run of the startup pipeline
    Normal,
    /// The startup pipeline twice on one store
    Rerun,
    /// Three tasks depending on each other in a ring
    Cycle,
    /// Rerun followed by cycle
    All,
}

/// One run of a scenario, with the monitor's log.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub result: RunResult,
    pub log: Vec<String>,
}

/// The startup pipeline.
///
/// `01` prepares the environment, `02` fetches remote config through the
/// asynchronous contract, `03`..`05` run concurrently (`05` always fails but
/// tolerates it), `06` routes on the main lane and `07` boots analytics.
pub fn normal_tasks(step: Duration) -> Vec<TaskRef> {
    vec![
        FnTask::new("01_env_prepare", |ctx| {
            ctx.set("env", "prod");
            ctx.set("baseURL", "https://api.example.com");
            Ok(())
        })
        .with_priority(100)
        .into_ref(),
        AsyncFnTask::new("02_fetch_remote_config", move |ctx, completion| {
            thread::spawn(move || {
                thread::sleep(step * 9);
                ctx.set("featureA", true);
                ctx.set("requestTimeout", 15);
                completion.succeed();
            });
        })
        .with_priority(80)
        .depends_on(["01_env_prepare"])
        .mode(ExecutionMode::Concurrent)
        .into_ref(),
        FnTask::new("03_login", move |ctx| {
            thread::sleep(step * 6);
            ctx.set("token", "token_demo_123");
            Ok(())
        })
        .with_priority(70)
        .depends_on(["02_fetch_remote_config"])
        .mode(ExecutionMode::Concurrent)
        .into_ref(),
        FnTask::new("04_warm_cache", move |ctx| {
            thread::sleep(step * 12);
            ctx.set("cacheWarm", true);
            Ok(())
        })
        .with_priority(60)
        .depends_on(["02_fetch_remote_config"])
        .mode(ExecutionMode::Concurrent)
        .into_ref(),
        FnTask::new("05_optional_check", move |_| {
            thread::sleep(step * 3);
            Err(TaskError::execution("optional check failed (mock)"))
        })
        .with_priority(50)
        .depends_on(["02_fetch_remote_config"])
        .mode(ExecutionMode::Concurrent)
        .with_continue_on_failure(true)
        .into_ref(),
        FnTask::new("06_route_main", |ctx| {
            if ctx.get_str("token").is_none() || ctx.get_bool("cacheWarm") != Some(true) {
                return Err(TaskError::execution("route prerequisites missing"));
            }
            ctx.set("initialRoute", "home");
            Ok(())
        })
        .with_priority(40)
        .depends_on(["03_login", "04_warm_cache"])
        .mode(ExecutionMode::Main)
        .into_ref(),
        FnTask::new("07_boot_analytics", |ctx| {
            ctx.set("analyticsBoot", "done");
            Ok(())
        })
        .with_priority(30)
        .depends_on(["06_route_main"])
        .into_ref(),
    ]
}

/// `cycle_A -> cycle_C -> cycle_B -> cycle_A`.
pub fn cycle_tasks() -> Vec<TaskRef> {
    vec![
        FnTask::new("cycle_A", |_| Ok(()))
            .depends_on(["cycle_C"])
            .into_ref(),
        FnTask::new("cycle_B", |_| Ok(()))
            .depends_on(["cycle_A"])
            .mode(ExecutionMode::Concurrent)
            .into_ref(),
        FnTask::new("cycle_C", |_| Ok(()))
            .depends_on(["cycle_B"])
            .into_ref(),
    ]
}

/// Runs demo scenarios against one configuration and completion store.
pub struct DemoRunner {
    config: OrchestratorConfig,
    store: Arc<dyn CompletionStore>,
    step: Duration,
}

impl DemoRunner {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: Arc::new(InMemoryCompletionStore::new()),
            step: DEFAULT_STEP,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn run(&self, scenario: Scenario) -> Result<Vec<ScenarioReport>> {
        match scenario {
            Scenario::Normal => Ok(vec![self.run_pipeline("normal")?]),
            Scenario::Rerun => self.run_rerun(),
            Scenario::Cycle => Ok(vec![self.run_cycle()?]),
            Scenario::All => {
                let mut reports = self.run_rerun()?;
                reports.push(self.run_cycle()?);
                Ok(reports)
            }
        }
    }

    fn pipeline(&self, name: &str) -> Result<(Orchestrator, Arc<LoggingMonitor>)> {
        let logger = Arc::new(LoggingMonitor::new(name));
        let monitor: Arc<dyn Monitor> = logger.clone();
        let mut orchestrator =
            Orchestrator::new(self.config.clone())?.with_store(self.store.clone());
        orchestrator.set_monitor(&monitor);
        for task in normal_tasks(self.step) {
            orchestrator.register(task)?;
        }
        Ok((orchestrator, logger))
    }

    fn run_pipeline(&self, name: &str) -> Result<ScenarioReport> {
        let (orchestrator, logger) = self.pipeline(name)?;
        let result = orchestrator.run(None);
        Ok(report(name, result, &logger))
    }

    fn run_rerun(&self) -> Result<Vec<ScenarioReport>> {
        let (mut orchestrator, first_logger) = self.pipeline("normal")?;
        let first = orchestrator.run(None);

        let second_logger = Arc::new(LoggingMonitor::new("rerun"));
        let monitor: Arc<dyn Monitor> = second_logger.clone();
        orchestrator.set_monitor(&monitor);
        let second = orchestrator.run(None);

        Ok(vec![
            report("normal", first, &first_logger),
            report("rerun", second, &second_logger),
        ])
    }

    fn run_cycle(&self) -> Result<ScenarioReport> {
        let logger = Arc::new(LoggingMonitor::new("cycle"));
        let monitor: Arc<dyn Monitor> = logger.clone();
        let config = self.config.clone().with_strict_dependency_check(true);
        let mut orchestrator = Orchestrator::new(config)?;
        orchestrator.set_monitor(&monitor);
        for task in cycle_tasks() {
            orchestrator.register(task)?;
        }
        let result = orchestrator.run(None);
        Ok(report("cycle", result, &logger))
    }
}

fn report(name: &str, result: RunResult, logger: &LoggingMonitor) -> ScenarioReport {
    ScenarioReport {
        name: name.to_string(),
        result,
        log: logger.lines(),
    }
}

/// Human-readable summary of a run.
pub fn render_result(result: &RunResult) -> String {
    let or_none = |s: Option<&str>| s.unwrap_or("none").to_string();
    let errors = result
        .errors_by_task_id()
        .iter()
        .map(|(id, err)| format!("{}: {}", id, err))
        .collect::<Vec<_>>()
        .join("; ");
    let snapshot = result.context_snapshot();
    let route = snapshot.get("initialRoute").and_then(|v| v.as_str());
    let token = snapshot.get("token").and_then(|v| v.as_str());

    let mut lines = vec![
        format!("success: {}", result.success()),
        format!("failed: {}", or_none(result.failed_task_id())),
        format!("ordered: {}", result.ordered_task_ids().join(" -> ")),
        format!("skipped: {}", result.skipped_task_ids().join(", ")),
        format!("errors: {}", if errors.is_empty() { "none".to_string() } else { errors }),
        format!("context(initialRoute/token): {} / {}", or_none(route), or_none(token)),
    ];
    if let Some(message) = result.configuration_error() {
        lines.push(format!("configuration error: {}", message));
    }
    lines.join("\n")
}
