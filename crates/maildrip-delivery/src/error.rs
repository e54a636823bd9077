//! Error types for delivery engine operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised by the delivery engine and its workers.
///
/// Transport-level failures are not here: they are [`crate::TransportError`],
/// recorded onto the message and fed to the queue's retry policy rather than
/// propagated out of the worker loop.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Message store operation failed.
    #[error("store error: {0}")]
    Store(#[from] maildrip_core::CoreError),

    /// Delay queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] maildrip_queue::QueueError),

    /// Workers did not finish within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Index of the worker that panicked.
        worker_id: usize,
        /// Join error description.
        message: String,
    },
}
