//! Wave scheduling by iterative topological peeling.
//!
//! A task joins the next wave once each of its dependencies is satisfied,
//! either completed in an earlier run or finished successfully in a prior
//! wave of this run. A failed task never satisfies a dependency; its
//! dependents (and theirs, transitively) are skipped instead.

use std::collections::{HashMap, HashSet};

use crate::core::dag::DependencyGraph;

/// Reason prefix for tasks skipped because an upstream task failed.
pub const UPSTREAM_FAILED: &str = "upstream dependency failed";
/// Reason for tasks satisfied by the completion store.
pub const ALREADY_COMPLETED: &str = "already completed";
/// Reason prefix for tasks left unscheduled by an aborted run.
pub const RUN_ABORTED: &str = "run aborted after failure of";

/// A set of tasks whose dependencies are all satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// 1-based position of the wave within the run.
    pub number: usize,
    /// Ids by descending priority, ties in registration order.
    pub task_ids: Vec<String>,
}

/// A task that will not be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipDecision {
    pub task_id: String,
    pub reason: String,
}

/// Produces the waves of one run.
pub struct WaveScheduler<'g> {
    graph: &'g DependencyGraph,
    /// Not yet scheduled, in registration order.
    pending: Vec<String>,
    satisfied: HashSet<String>,
    failed: HashSet<String>,
    /// Skipped id → the failed task that caused it.
    blocked_by: HashMap<String, String>,
    waves_emitted: usize,
}

impl<'g> WaveScheduler<'g> {
    /// `already_completed` ids are treated as satisfied and never scheduled.
    pub fn new<I, S>(graph: &'g DependencyGraph, already_completed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let satisfied: HashSet<String> = already_completed
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| graph.contains(id))
            .collect();
        let pending = graph
            .nodes()
            .filter(|node| !satisfied.contains(&node.id))
            .map(|node| node.id.clone())
            .collect();

        Self {
            graph,
            pending,
            satisfied,
            failed: HashSet::new(),
            blocked_by: HashMap::new(),
            waves_emitted: 0,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn waves_emitted(&self) -> usize {
        self.waves_emitted
    }

    pub fn is_satisfied(&self, id: &str) -> bool {
        self.satisfied.contains(id)
    }

    pub fn record_success(&mut self, id: &str) {
        self.satisfied.insert(id.to_string());
    }

    pub fn record_failure(&mut self, id: &str) {
        self.failed.insert(id.to_string());
    }

    /// Remove every pending task that can no longer run because a
    /// dependency failed or was itself skipped.
    pub fn propagate_skips(&mut self) -> Vec<SkipDecision> {
        let mut decisions = Vec::new();
        loop {
            let mut changed = false;
            let mut index = 0;
            while index < self.pending.len() {
                let id = &self.pending[index];
                match self.blocking_root(id) {
                    Some(root) => {
                        let id = self.pending.remove(index);
                        decisions.push(SkipDecision {
                            task_id: id.clone(),
                            reason: format!("{}: {}", UPSTREAM_FAILED, root),
                        });
                        self.blocked_by.insert(id, root);
                        changed = true;
                    }
                    None => index += 1,
                }
            }
            if !changed {
                return decisions;
            }
        }
    }

    /// The failed task behind the first failed or skipped dependency of `id`.
    fn blocking_root(&self, id: &str) -> Option<String> {
        self.graph.dependencies(id).into_iter().find_map(|dep| {
            if self.failed.contains(dep) {
                Some(dep.to_string())
            } else {
                self.blocked_by.get(dep).cloned()
            }
        })
    }

    /// Peel off the next wave, or `None` when nothing is ready.
    pub fn next_wave(&mut self) -> Option<Wave> {
        let (ready, waiting): (Vec<String>, Vec<String>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|id| {
                self.graph
                    .dependencies(id)
                    .iter()
                    .all(|dep| self.satisfied.contains(*dep))
            });
        self.pending = waiting;

        if ready.is_empty() {
            return None;
        }

        let mut nodes: Vec<_> = ready
            .iter()
            .filter_map(|id| self.graph.node(id))
            .collect();
        nodes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.registration_index.cmp(&b.registration_index))
        });

        self.waves_emitted += 1;
        Some(Wave {
            number: self.waves_emitted,
            task_ids: nodes.into_iter().map(|n| n.id.clone()).collect(),
        })
    }

    /// Skip everything still pending with `reason`.
    pub fn drain_pending(&mut self, reason: &str) -> Vec<SkipDecision> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|task_id| SkipDecision {
                task_id,
                reason: reason.to_string(),
            })
            .collect()
    }

    /// Stop scheduling after a fatal failure of `failed_id`.
    pub fn abort(&mut self, failed_id: &str) -> Vec<SkipDecision> {
        let mut decisions = self.propagate_skips();
        decisions.extend(self.drain_pending(&format!("{} {}", RUN_ABORTED, failed_id)));
        decisions
    }
}
