//! Integration test suite for taskwave.
//!
//! These tests drive the public `Orchestrator` API end to end: graph
//! validation, wave ordering, skip and abort policy, the execution lanes,
//! the bounded concurrent pool and its wave deadline, monitor events, and
//! resumable runs backed by a completion store.
//!
//! # Test Categories
//!
//! - `ordering`: topological order, priorities, configuration errors
//! - `failures`: skip propagation, abort, continue-on-failure
//! - `concurrency`: concurrency bound, wave timeout, lanes, shared context
//! - `monitor_events`: lifecycle event order
//! - `resumability`: completion stores across runs and orchestrators

mod fixtures;

mod concurrency;
mod monitor_events;
mod ordering;
