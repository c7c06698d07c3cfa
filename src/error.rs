use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Execution lane '{0}' is closed")]
    LaneClosed(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether this error is a dependency-graph configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownDependency { .. } | Error::DependencyCycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported for a single task.
///
/// Unlike [`Error`], this type is cloneable and serializable so it can be
/// carried inside an immutable run result.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskError {
    /// The task reported its own failure.
    #[error("{message}")]
    Execution { message: String },

    /// A concurrent task did not finish before the wave deadline.
    #[error("timed out after {seconds}s (started: {started})")]
    Timeout { seconds: f64, started: bool },

    /// The task body panicked.
    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// An asynchronous task dropped its completion handle without signalling.
    #[error("completion handle dropped without a signal")]
    CompletionDropped,

    /// The dependency graph could not be validated.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl TaskError {
    /// Build an execution failure from any displayable message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}
