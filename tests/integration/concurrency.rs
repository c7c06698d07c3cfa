//! Execution modes, the concurrency bound and the wave deadline.

use crate::fixtures::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use taskwave::{
    AsyncFnTask, Completion, ExecutionLane, ExecutionMode, FnTask, Orchestrator,
    OrchestratorConfig, TaskContext, TaskError,
};

#[test]
fn test_concurrency_bound_of_two() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks = (0..5)
        .map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            FnTask::new(format!("worker_{}", i), move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(80));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .mode(ExecutionMode::Concurrent)
            .into_ref()
        })
        .collect();

    let config = config().with_max_background_concurrency(2);
    let result = orchestrator_with(config, tasks).run(None);

    assert!(result.success());
    assert_eq!(result.ordered_task_ids().len(), 5);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_tasks_overlap() {
    let tasks = (0..4)
        .map(|i| sleeper(&format!("s{}", i), 200).into_ref())
        .collect();
    let start = Instant::now();
    let result = orchestrator(tasks).run(None);

    assert!(result.success());
    assert!(
        start.elapsed() < Duration::from_millis(700),
        "four 200ms tasks with limit 4 took {:?}",
        start.elapsed()
    );
}

#[test]
fn test_silent_async_task_times_out_at_deadline() {
    let parked: Arc<Mutex<Vec<Completion>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = parked.clone();
    let tasks = vec![
        AsyncFnTask::new("never_signals", move |_ctx, completion| {
            keep.lock().unwrap().push(completion);
        })
        .mode(ExecutionMode::Concurrent)
        .into_ref(),
        sleeper("quick", 10).into_ref(),
    ];

    let config = config().with_background_wave_timeout_secs(1.0);
    let start = Instant::now();
    let result = orchestrator_with(config, tasks).run(None);
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2500), "{:?}", elapsed);
    assert!(!result.success());
    assert!(matches!(
        result.error_for("never_signals"),
        Some(TaskError::Timeout { started: true, .. })
    ));
    assert!(result.was_executed("quick"));
    assert!(result.error_for("quick").is_none());
}

#[test]
fn test_timeout_invokes_cancel_hook() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let counter = cancelled.clone();
    let parked: Arc<Mutex<Vec<Completion>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = parked.clone();
    let task = AsyncFnTask::new("hangs", move |_ctx, completion| {
        keep.lock().unwrap().push(completion);
    })
    .mode(ExecutionMode::Concurrent)
    .on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .into_ref();

    let config = config().with_background_wave_timeout_secs(0.3);
    let result = orchestrator_with(config, vec![task]).run(None);
    assert!(result.error_for("hangs").is_some_and(TaskError::is_timeout));

    let deadline = Instant::now() + Duration::from_secs(2);
    while cancelled.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}

#[test]
fn test_serial_async_task_waits_without_deadline() {
    let task = AsyncFnTask::new("slow_serial", |ctx, completion| {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(400));
            ctx.set("done", true);
            completion.succeed();
        });
    })
    .into_ref();

    let config = config().with_background_wave_timeout_secs(0.1);
    let result = orchestrator_with(config, vec![task]).run(None);
    assert!(result.success());
    assert_eq!(result.context_snapshot()["done"], true);
}

#[test]
fn test_dropped_completion_is_failure() {
    let task = AsyncFnTask::new("drops", |_ctx, completion| drop(completion))
        .mode(ExecutionMode::Concurrent)
        .into_ref();
    let result = orchestrator(vec![task]).run(None);
    assert_eq!(result.error_for("drops"), Some(&TaskError::CompletionDropped));
}

#[test]
fn test_modes_run_on_their_lanes() {
    let record = |id: &str, mode: ExecutionMode| {
        let key = id.to_string();
        FnTask::new(id, move |ctx| {
            let name = thread::current().name().unwrap_or("unnamed").to_string();
            ctx.set(key.clone(), name);
            Ok(())
        })
        .mode(mode)
        .into_ref()
    };
    let tasks = vec![
        record("serial", ExecutionMode::Serial),
        record("main", ExecutionMode::Main),
        record("concurrent", ExecutionMode::Concurrent),
    ];
    let result = orchestrator(tasks).run(None);
    let snapshot = result.context_snapshot();

    assert_eq!(snapshot["serial"], "taskwave-serial");
    assert_eq!(snapshot["main"], "taskwave-main");
    assert_ne!(snapshot["concurrent"], "taskwave-serial");
    assert_ne!(snapshot["concurrent"], "taskwave-main");
}

#[test]
fn test_shared_main_lane() {
    let lane = Arc::new(ExecutionLane::spawn("app-main").unwrap());
    let task = FnTask::new("ui", |ctx| {
        ctx.set("thread", thread::current().name().unwrap_or(""));
        Ok(())
    })
    .mode(ExecutionMode::Main)
    .into_ref();

    let mut orch = Orchestrator::new(OrchestratorConfig::default())
        .unwrap()
        .with_main_lane(lane.clone());
    orch.register(task).unwrap();
    let result = orch.run(None);

    assert_eq!(result.context_snapshot()["thread"], "app-main");
    let name = lane
        .run_blocking(|| thread::current().name().map(str::to_string))
        .unwrap();
    assert_eq!(name.as_deref(), Some("app-main"));
}

#[test]
fn test_context_flows_between_waves() {
    let tasks = vec![
        FnTask::new("writer", |ctx| {
            ctx.set("token", "abc");
            Ok(())
        })
        .into_ref(),
        FnTask::new("reader", |ctx| match ctx.get_str("token").as_deref() {
            Some("abc") => {
                ctx.set("seen", true);
                Ok(())
            }
            _ => Err(TaskError::execution("token not visible")),
        })
        .depends_on(["writer"])
        .mode(ExecutionMode::Concurrent)
        .into_ref(),
    ];
    let initial = TaskContext::new();
    initial.set("seed", 1);
    let result = orchestrator(tasks).run(Some(initial.clone()));

    assert!(result.success());
    assert_eq!(initial.get_bool("seen"), Some(true));
    assert_eq!(result.context_snapshot()["seed"], 1);
}

#[test]
fn test_prepare_hook_runs_before_execute() {
    let task = FnTask::new("prepared", |ctx| {
        if ctx.get_bool("ready") == Some(true) {
            Ok(())
        } else {
            Err(TaskError::execution("prepare did not run"))
        }
    })
    .on_prepare(|ctx| {
        ctx.set("ready", true);
    })
    .mode(ExecutionMode::Concurrent)
    .into_ref();
    assert!(orchestrator(vec![task]).run(None).success());
}

#[test]
fn test_bound_holds_across_waves_after_timeout() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tracked = |id: &str, millis: u64, deps: &[&str]| {
        let active = active.clone();
        let peak = peak.clone();
        FnTask::new(id, move |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(millis));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .depends_on(deps.iter().copied())
        .mode(ExecutionMode::Concurrent)
        .with_continue_on_failure(true)
        .into_ref()
    };
    let tasks = vec![
        tracked("slow1", 1500, &[]),
        tracked("slow2", 1500, &[]),
        ok("gate", &[]).into_ref(),
        tracked("w2a", 50, &["gate"]),
        tracked("w2b", 50, &["gate"]),
    ];

    let config = config()
        .with_max_background_concurrency(2)
        .with_background_wave_timeout_secs(0.3);
    let monitor = RecordingMonitor::new();
    let mut orch = orchestrator_with(config, tasks);
    let _keep = attach(&mut orch, &monitor);
    let result = orch.run(None);

    assert_eq!(result.waves().len(), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(matches!(
        result.error_for("slow1"),
        Some(TaskError::Timeout { started: true, .. })
    ));

    // The second wave found no free slot before its deadline.
    for id in ["w2a", "w2b"] {
        assert!(matches!(
            result.error_for(id),
            Some(TaskError::Timeout { started: false, .. })
        ));
        assert!(!result.was_executed(id));
        assert!(!monitor.events().iter().any(|e| matches!(
            e,
            Event::WillStart(t) | Event::Finished(t, _) if t == id
        )));
    }
    assert_eq!(result.ordered_task_ids(), ["gate", "slow1", "slow2"]);
}

#[test]
fn test_run_called_from_shared_main_lane() {
    let lane = Arc::new(ExecutionLane::spawn("app-main").unwrap());
    let task = FnTask::new("ui", |ctx| {
        ctx.set("thread", thread::current().name().unwrap_or(""));
        Ok(())
    })
    .mode(ExecutionMode::Main)
    .into_ref();

    let mut orch = Orchestrator::new(OrchestratorConfig::default())
        .unwrap()
        .with_main_lane(lane.clone());
    orch.register(task).unwrap();
    let orch = Arc::new(orch);

    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(lane.run_blocking(move || orch.run(None)));
    });

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("run from the main lane should finish")
        .unwrap();
    assert!(result.success());
    assert_eq!(result.context_snapshot()["thread"], "app-main");
}
