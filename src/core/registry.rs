//! Task registry: id → task, in registration order.

use std::collections::HashMap;
use tracing::debug;

use crate::core::task::TaskRef;
use crate::{Error, Result};

/// Registered tasks keyed by id.
///
/// Re-registering an id replaces the previous task in place, keeping its
/// original registration position.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    order: Vec<String>,
    tasks: HashMap<String, TaskRef>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, returning the task it replaced, if any.
    ///
    /// # Errors
    /// Returns `Error::Validation` if the task id is empty.
    pub fn register(&mut self, task: TaskRef) -> Result<Option<TaskRef>> {
        let id = task.id().to_string();
        if id.trim().is_empty() {
            return Err(Error::Validation("task id must not be empty".to_string()));
        }

        let previous = self.tasks.insert(id.clone(), task);
        if previous.is_some() {
            debug!("TaskRegistry: replaced task {}", id);
        } else {
            self.order.push(id);
        }
        Ok(previous)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Tasks in registration order, for building a run's graph.
    pub fn snapshot(&self) -> Vec<TaskRef> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.order)
            .finish()
    }
}
