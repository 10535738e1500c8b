//! Error types for ingestd.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using ingestd's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ingestd operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing submission fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication failed (no verified principal)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is neither the job owner nor an admin
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Job id has no known record
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Queue transport failure (wraps redis errors)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Cancel requested on a job already in a terminal state
    #[error("Cancel failed: job {0} is already in a terminal state")]
    CancelFailed(Uuid),

    /// Rejected status transition
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Broker(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
