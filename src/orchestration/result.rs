//! Run identity, per-run bookkeeping and the immutable run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::TaskError;
use crate::orchestration::dispatcher::TaskOutcome;

/// Unique identifier of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    run_id: RunId,
    success: bool,
    ordered_task_ids: Vec<String>,
    skipped_task_ids: Vec<String>,
    skip_reasons: BTreeMap<String, String>,
    failed_task_id: Option<String>,
    errors_by_task_id: BTreeMap<String, TaskError>,
    configuration_error: Option<String>,
    waves: Vec<Vec<String>>,
    task_durations_ms: BTreeMap<String, f64>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    context_snapshot: Map<String, Value>,
}

impl RunResult {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// True when the graph validated and no task failed.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Ids of every dispatched task, in dispatch order.
    pub fn ordered_task_ids(&self) -> &[String] {
        &self.ordered_task_ids
    }

    pub fn skipped_task_ids(&self) -> &[String] {
        &self.skipped_task_ids
    }

    pub fn skip_reason(&self, id: &str) -> Option<&str> {
        self.skip_reasons.get(id).map(String::as_str)
    }

    pub fn skip_reasons(&self) -> &BTreeMap<String, String> {
        &self.skip_reasons
    }

    /// The first failure that stopped the run.
    pub fn failed_task_id(&self) -> Option<&str> {
        self.failed_task_id.as_deref()
    }

    pub fn errors_by_task_id(&self) -> &BTreeMap<String, TaskError> {
        &self.errors_by_task_id
    }

    pub fn error_for(&self, id: &str) -> Option<&TaskError> {
        self.errors_by_task_id.get(id)
    }

    /// Set when the run aborted before the first wave.
    pub fn configuration_error(&self) -> Option<&str> {
        self.configuration_error.as_deref()
    }

    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn task_duration_ms(&self, id: &str) -> Option<f64> {
        self.task_durations_ms.get(id).copied()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn context_snapshot(&self) -> &Map<String, Value> {
        &self.context_snapshot
    }

    pub fn was_executed(&self, id: &str) -> bool {
        self.ordered_task_ids.iter().any(|t| t == id)
    }

    pub fn was_skipped(&self, id: &str) -> bool {
        self.skip_reasons.contains_key(id)
    }
}

/// Mutable state of a run in progress.
#[derive(Debug)]
pub(crate) struct RunState {
    run_id: RunId,
    started_at: DateTime<Utc>,
    ordered: Vec<String>,
    skipped: Vec<String>,
    skip_reasons: BTreeMap<String, String>,
    errors: BTreeMap<String, TaskError>,
    failed_task_id: Option<String>,
    configuration_error: Option<String>,
    waves: Vec<Vec<String>>,
    durations_ms: BTreeMap<String, f64>,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            ordered: Vec::new(),
            skipped: Vec::new(),
            skip_reasons: BTreeMap::new(),
            errors: BTreeMap::new(),
            failed_task_id: None,
            configuration_error: None,
            waves: Vec::new(),
            durations_ms: BTreeMap::new(),
        }
    }

    pub(crate) fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The first reason recorded for an id wins.
    pub(crate) fn record_skip(&mut self, id: &str, reason: &str) {
        if let Entry::Vacant(entry) = self.skip_reasons.entry(id.to_string()) {
            entry.insert(reason.to_string());
            self.skipped.push(id.to_string());
        }
    }

    pub(crate) fn record_wave(&mut self, ids: Vec<String>) {
        self.waves.push(ids);
    }

    /// Tasks that never started only contribute their error.
    pub(crate) fn record_outcome(&mut self, outcome: &TaskOutcome) {
        if outcome.started_at.is_some() {
            self.ordered.push(outcome.task_id.clone());
            self.durations_ms
                .insert(outcome.task_id.clone(), outcome.duration_ms());
        }
        if let Err(err) = &outcome.result {
            self.errors.insert(outcome.task_id.clone(), err.clone());
        }
    }

    pub(crate) fn record_fatal(&mut self, id: &str) {
        if self.failed_task_id.is_none() {
            self.failed_task_id = Some(id.to_string());
        }
    }

    pub(crate) fn record_configuration_error(&mut self, message: String, offending: Option<String>) {
        if let Some(id) = &offending {
            self.errors.insert(
                id.clone(),
                TaskError::Configuration {
                    message: message.clone(),
                },
            );
        }
        self.failed_task_id = offending;
        self.configuration_error = Some(message);
    }

    pub(crate) fn is_successful(&self) -> bool {
        self.configuration_error.is_none() && self.errors.is_empty()
    }

    pub(crate) fn finish(self, context_snapshot: Map<String, Value>) -> RunResult {
        let success = self.is_successful();
        RunResult {
            run_id: self.run_id,
            success,
            ordered_task_ids: self.ordered,
            skipped_task_ids: self.skipped,
            skip_reasons: self.skip_reasons,
            failed_task_id: self.failed_task_id,
            errors_by_task_id: self.errors,
            configuration_error: self.configuration_error,
            waves: self.waves,
            task_durations_ms: self.durations_ms,
            started_at: self.started_at,
            finished_at: Utc::now(),
            context_snapshot,
        }
    }
}
