//! Error types for taskpulse.

use thiserror::Error;

/// Result type alias using taskpulse's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for taskpulse operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backing store failure outside of sqlx (in-memory adapters, cache backends)
    #[error("Store error: {0}")]
    Store(String),

    /// Resource not found (or not owned by the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task not found (or not owned by the caller)
    #[error("Task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// Malformed or invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Email or broadcast delivery failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error describes a missing (or foreign-owned) resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::TaskNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Delivery(e.to_string())
    }
}
