//! Delayed task queue for message delivery.
//!
//! Holds one task per scheduled message, invisible to workers until its
//! `ready_at` instant. The contract — enqueue with deduplication, lease with
//! a visibility timeout, ack, policy-driven fail, and cancel — is what the
//! rest of the system depends on; the backing technology is not. Two
//! implementations ship: a PostgreSQL delay table leased with
//! `FOR UPDATE SKIP LOCKED`, and an in-memory queue driven by an injected
//! clock for deterministic tests.
//!
//! Delivery is at-least-once: a worker that crashes between lease and
//! ack loses its lease at expiry and the task is redelivered. Consumers must
//! therefore make processing idempotent (the delivery worker re-checks
//! message status before sending).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use maildrip_core::MessageId;
use serde::{Deserialize, Serialize};

pub mod error;
mod memory;
mod postgres;
pub mod retry;

pub use error::{QueueError, Result};
pub use memory::MemoryDelayQueue;
pub use postgres::PgDelayQueue;
pub use retry::{Backoff, RetryDecision, RetryPolicy};

/// Default lease duration before an unacked task becomes visible again.
pub const DEFAULT_LEASE_DURATION: std::time::Duration = std::time::Duration::from_secs(60);

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Payload of one delivery task: which message to send.
///
/// The recipient is carried along for log context only; the worker always
/// re-reads the message row before acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTask {
    /// The message this task delivers.
    pub message_id: MessageId,
    /// Destination address, for observability.
    pub recipient: String,
}

/// A task checked out by exactly one worker.
///
/// Invisible to other workers until acked, failed, or the lease expires.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    /// Queue-assigned task identifier.
    pub task_id: i64,
    /// The task payload.
    pub task: DeliveryTask,
    /// Deduplication key the task was enqueued under.
    pub dedupe_key: String,
    /// 1-based delivery attempt number, counting this lease.
    pub attempt: u32,
}

/// Durable delayed queue contract.
pub trait DelayQueue: Send + Sync + 'static {
    /// Inserts a task that becomes leasable at `ready_at`.
    ///
    /// If a task with the same `dedupe_key` is already pending (enqueued or
    /// leased, but not yet acked or discarded), the call is a no-op —
    /// submission is idempotent per message.
    fn enqueue(
        &self,
        task: DeliveryTask,
        ready_at: DateTime<Utc>,
        dedupe_key: String,
    ) -> QueueFuture<'_, ()>;

    /// Checks out one ready task for exclusive processing.
    ///
    /// Returns `None` when nothing is ready. A returned task is invisible to
    /// other workers until `ack`, `fail`, or lease expiry. Lease order under
    /// contention is unspecified beyond "never before `ready_at`".
    fn lease(&self, worker_id: usize) -> QueueFuture<'_, Option<LeasedTask>>;

    /// Permanently removes a completed task.
    fn ack(&self, lease: LeasedTask) -> QueueFuture<'_, ()>;

    /// Reports a failed attempt.
    ///
    /// The queue's retry policy decides: re-enqueue with backoff, or discard
    /// permanently once attempts are exhausted. Callers must record the
    /// failure on the message *before* calling this — a discarded task is
    /// gone.
    fn fail(&self, lease: LeasedTask, reason: String) -> QueueFuture<'_, ()>;

    /// Removes a pending, not-yet-leased task by deduplication key.
    ///
    /// Returns `true` if a task was removed. A no-op (`false`) if the task
    /// is currently leased or absent; a leased task's fate is settled by the
    /// worker holding it.
    fn cancel(&self, dedupe_key: String) -> QueueFuture<'_, bool>;
}
