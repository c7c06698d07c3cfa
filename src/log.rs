//! Structured logging setup.
//!
//! The library emits `tracing` events:
//! - WARN: dropped dependency edges, wave timeouts, store write failures
//! - INFO: run start/finish and wave dispatch
//! - DEBUG: state machine transitions and per-task outcomes
//!
//! Debug mode can be enabled with `--debug` or `TASKWAVE_DEBUG=1`.
//! `RUST_LOG` takes precedence over both when set.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging at INFO level (or DEBUG when `TASKWAVE_DEBUG` is set).
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; later calls only update the debug flag.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("TASKWAVE_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::new(default_directive(debug_enabled)),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "taskwave=debug"
    } else {
        "taskwave=info"
    }
}
