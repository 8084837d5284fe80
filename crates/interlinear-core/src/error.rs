//! Error types for interlinear.

use thiserror::Error;

/// Result type alias using interlinear's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for interlinear operations.
///
/// The variants follow the job system's failure taxonomy: transient provider
/// failures are retried with a fixed delay, parse and integrity failures are
/// absorbed by fallbacks inside the pipeline, and permanent failures end the
/// job immediately.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Unique constraint conflict reported by the store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Operation not legal in the job's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generation provider failed (transport error, bad status)
    #[error("Inference error: {0}")]
    Inference(String),

    /// External call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generation provider asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Structured provider response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Aligned segments do not reconstruct the source text
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Job can never succeed (unsupported configuration, missing target)
    #[error("Permanent job error: {0}")]
    Permanent(String),

    /// Job failed on its final allowed attempt
    #[error("max retries exceeded ({attempts}/{max_retries}): {last_error}")]
    RetriesExhausted {
        attempts: i32,
        max_retries: i32,
        last_error: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a job failing with this error should be rescheduled.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Inference(_)
                | Error::Timeout(_)
                | Error::RateLimited(_)
                | Error::Request(_)
                | Error::Database(_)
        )
    }

    /// Whether a job failing with this error must not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Permanent(_)
                | Error::InvalidInput(_)
                | Error::Config(_)
                | Error::RetriesExhausted { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.is_unique_violation() {
                return Error::Conflict(db.message().to_string());
            }
        }
        Error::Database(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
