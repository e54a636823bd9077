//! Delivery engine for scheduled messages.
//!
//! Drains the delay queue with a bounded pool of async workers. Each worker
//! leases a task, re-reads the message row (so cancellations and duplicate
//! deliveries are caught), claims it as `Processing`, waits for a permit
//! from the process-wide hourly rate limiter, invokes the email transport,
//! and records the outcome. One message's failure never blocks another:
//! failures go back to the queue, whose retry policy decides redelivery.
//!
//! # Architecture
//!
//! 1. **Lease** — worker checks out one ready task from the delay queue
//! 2. **Re-check** — message status is re-read; `Cancelled` and `Sent` skip
//! 3. **Throttle** — a token-bucket permit bounds sends per hour process-wide
//! 4. **Send** — the transport capability delivers the email
//! 5. **Record** — status, `sent_time`/`error`, and the queue ack/fail

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod limiter;
pub mod transport;
mod worker;
mod worker_pool;

pub use engine::{DeliveryConfig, DeliveryEngine, EngineStats};
pub use error::{DeliveryError, Result};
pub use limiter::HourlyRateLimiter;
pub use transport::{EmailTransport, HttpApiTransport, OutboundEmail, TransportError};
pub use worker::DeliveryWorker;
pub use worker_pool::WorkerPool;

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default process-wide send cap per hour.
pub const DEFAULT_MAX_SENDS_PER_HOUR: u32 = 100;
