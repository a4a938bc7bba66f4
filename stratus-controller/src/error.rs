//! Scheduling error taxonomy
//!
//! Every failure that crosses a backend, placement or store boundary is
//! translated into [`SchedError`]. Only [`SchedError::Transient`] is retried
//! (on the next delegation candidate); every other kind propagates to the
//! caller immediately.

use stratus_client::ClientError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedError {
    /// Service, job or cluster absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad service descriptor
    #[error("invalid service definition: {0}")]
    InvalidSpec(String),

    /// Object already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network failure or timeout talking to a backend or remote cluster
    #[error("transient failure: {0}")]
    Transient(String),

    /// Every eligible delegation candidate was exhausted
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// Synchronous invocation requested against a backend without that capability
    #[error("backend does not support {0}")]
    BackendUnsupported(String),

    /// Job store or other local failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedError::NotFound(_))
    }

    /// Classifies an HTTP error status returned by a runtime API
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => SchedError::NotFound(message),
            409 => SchedError::Conflict(message),
            400 | 422 => SchedError::InvalidSpec(message),
            s if s >= 500 || s == 429 => SchedError::Transient(message),
            _ => SchedError::Internal(message),
        }
    }
}

impl From<reqwest::Error> for SchedError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SchedError::from_status(status.as_u16(), err.to_string()),
            None if err.is_decode() || err.is_builder() => SchedError::Internal(err.to_string()),
            None => SchedError::Transient(err.to_string()),
        }
    }
}

impl From<ClientError> for SchedError {
    fn from(err: ClientError) -> Self {
        if err.is_not_found() {
            SchedError::NotFound(err.to_string())
        } else if err.is_conflict() {
            SchedError::Conflict(err.to_string())
        } else if err.is_transient() {
            SchedError::Transient(err.to_string())
        } else if matches!(err.status(), Some(400) | Some(422)) {
            SchedError::InvalidSpec(err.to_string())
        } else {
            SchedError::Internal(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SchedError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SchedError::Transient("request timed out".to_string())
    }
}
