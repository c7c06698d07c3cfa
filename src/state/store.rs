//! Completion state stores.
//!
//! A store answers whether a task id has already completed, so a fresh run
//! can skip it. Stores outlive the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::Result;

/// Oracle of previously completed task ids.
pub trait CompletionStore: Send + Sync {
    fn is_completed(&self, id: &str) -> bool;

    fn mark_completed(&self, id: &str) -> Result<()>;

    fn reset_all(&self) -> Result<()>;
}

/// Process-local store; the default for a new orchestrator.
#[derive(Debug, Default)]
pub struct InMemoryCompletionStore {
    completed: RwLock<HashSet<String>>,
}

impl InMemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompletionStore for InMemoryCompletionStore {
    fn is_completed(&self, id: &str) -> bool {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn mark_completed(&self, id: &str) -> Result<()> {
        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        Ok(())
    }

    fn reset_all(&self) -> Result<()> {
        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CompletionFile {
    #[serde(default)]
    completed: BTreeSet<String>,
}

/// Store persisted as a JSON file, so completion survives the process.
///
/// The whole set is rewritten on every change.
#[derive(Debug)]
pub struct JsonFileCompletionStore {
    path: PathBuf,
    completed: RwLock<BTreeSet<String>>,
}

impl JsonFileCompletionStore {
    /// Open the store at `path`, loading existing state if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let completed = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeSet::new()
            } else {
                serde_json::from_str::<CompletionFile>(&content)?.completed
            }
        } else {
            BTreeSet::new()
        };
        debug!(
            "JsonFileCompletionStore::open path={} completed={}",
            path.display(),
            completed.len()
        );
        Ok(Self {
            path,
            completed: RwLock::new(completed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Completed ids, sorted.
    pub fn completed_ids(&self) -> Vec<String> {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn persist(&self, completed: &BTreeSet<String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = CompletionFile {
            completed: completed.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CompletionStore for JsonFileCompletionStore {
    fn is_completed(&self, id: &str) -> bool {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn mark_completed(&self, id: &str) -> Result<()> {
        let mut completed = self
            .completed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if completed.insert(id.to_string()) {
            self.persist(&completed)?;
        }
        Ok(())
    }

    fn reset_all(&self) -> Result<()> {
        let mut completed = self
            .completed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        completed.clear();
        self.persist(&completed)
    }
}
