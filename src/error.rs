//! Error types for task graph resolution and task execution

use thiserror::Error;

/// Problems with the shape of the task graph itself.
///
/// These are detected before any action runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Task name must not be empty")]
    EmptyName,

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{task}' depends on '{prerequisite}' which is not registered")]
    UnknownPrerequisite { task: String, prerequisite: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Failure of a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] GraphError),

    #[error("Task '{task}' failed: {source:#}")]
    Action {
        task: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RunError {
    /// Name of the task whose action failed, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            RunError::Action { task, .. } => Some(task),
            RunError::Configuration(_) => None,
        }
    }
}
