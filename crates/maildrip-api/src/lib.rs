//! Batch scheduling service and HTTP surface.
//!
//! [`BatchScheduler`] is the submission entry point: it validates a batch,
//! runs the time-bucket allocator, persists one message per recipient, and
//! enqueues a delayed delivery task for each. The axum router in
//! [`server`] is a thin shell over it — owner identity arrives in the
//! `x-owner-id` header (stamped by an upstream proxy; authentication itself
//! is outside this service).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use scheduler::{BatchReceipt, BatchScheduler};
pub use server::{create_router, AppState};
