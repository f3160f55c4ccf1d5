//! Error types for startup operations.

use std::time::Duration;

use thiserror::Error;

use crate::task::TaskId;

/// Result type for startup operations.
pub type StartupResult<T> = Result<T, StartupError>;

/// Errors that can occur while running a startup sequence.
#[derive(Debug, Error)]
pub enum StartupError {
    /// No task is registered under the referenced id.
    #[error("no task registered for `{0}`")]
    Unresolved(TaskId),

    /// Every alternative of a `one_of` failed.
    ///
    /// Individual branch errors are logged when they occur but not carried here.
    #[error("all tasks failed")]
    AllTasksFailed {
        /// Number of alternatives that were attempted.
        attempted: usize,
    },

    /// `begin_startup_sequence` was called after the sequence had started.
    #[error("startup sequence has already been started")]
    AlreadyStarted,

    /// A bounded wait expired.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// How long the task waited.
        after: Duration,
    },

    /// Required input was missing; the task failed without retrying.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// The user or the shell cancelled the task.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A task reported a failure with a plain message.
    #[error("{0}")]
    Failed(String),

    /// Any other failure raised by a task.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StartupError {
    /// Build a [`StartupError::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for [`StartupError::Timeout`], which is logged apart from
    /// ordinary failures.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
