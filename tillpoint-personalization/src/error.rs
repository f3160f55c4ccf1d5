//! Error types for personalization.

use std::time::Duration;

use thiserror::Error;
use tillpoint_core::{StartupError, StorageError};

/// Result type for personalization operations.
pub type PersonalizationResult<T> = Result<T, PersonalizationError>;

/// Errors that can occur while personalizing a device.
#[derive(Debug, Error)]
pub enum PersonalizationError {
    /// A server address or parameter URL could not be turned into a URL.
    #[error("invalid personalization URL: {0}")]
    InvalidUrl(String),

    /// HTTP layer failed for a reason other than connectivity or timeout.
    #[error("personalization request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body was not the expected JSON.
    #[error("failed to parse personalization payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The server rejected the stored device token (HTTP 401).
    #[error("Device saved token does not match server")]
    TokenMismatch,

    /// The server could not be reached at all.
    #[error("Unable to connect to {target}")]
    Unreachable {
        /// `host:port` that was contacted.
        target: String,
    },

    /// The server answered with a non-success status; carries its status text.
    #[error("{0}")]
    Status(String),

    /// A bounded wait expired.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The bound that expired.
        after: Duration,
    },

    /// No complete saved session exists in storage.
    #[error("no saved session")]
    NoSavedSession,

    /// Required personalization input was not supplied.
    #[error("missing personalization parameters: {0}")]
    MissingParameters(String),

    /// Service discovery failed to produce a usable instance.
    #[error("service discovery failed: {0}")]
    Discovery(String),

    /// The user or the shell cancelled the operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Session credentials could not be persisted.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PersonalizationError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Unreachable { .. }
                | Self::Status(_)
                | Self::Timeout { .. }
                | Self::Discovery(_)
        )
    }
}

impl From<PersonalizationError> for StartupError {
    fn from(error: PersonalizationError) -> Self {
        match error {
            PersonalizationError::Timeout { operation, after } => {
                StartupError::Timeout { operation, after }
            }
            PersonalizationError::Cancelled(reason) => StartupError::Cancelled(reason),
            PersonalizationError::MissingParameters(what) => StartupError::Precondition(what),
            PersonalizationError::NoSavedSession => {
                StartupError::Precondition("no saved session".to_string())
            }
            other => StartupError::Other(anyhow::Error::new(other)),
        }
    }
}
