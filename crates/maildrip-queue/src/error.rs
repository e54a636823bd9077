//! Error types for queue operations.

use thiserror::Error;

/// Result type alias using `QueueError`.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by delay queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backing store rejected or dropped the operation.
    #[error("queue database error: {0}")]
    Database(String),

    /// Task payload could not be encoded or decoded.
    #[error("task serialization error: {0}")]
    Serialization(String),

    /// The queue is not reachable; submission paths must fail loudly rather
    /// than leave scheduled messages with no queue entry.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
