//! Core domain types and scheduling logic for maildrip.
//!
//! Provides strongly-typed identifiers, the message lifecycle state machine,
//! the time-bucket dispatch allocator, the clock abstraction, and the message
//! store contract with its Postgres and in-memory implementations. Every
//! other crate in the workspace builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use allocator::allocate;
pub use error::{CoreError, Result};
pub use models::{
    dedupe_key_for, BatchRequest, Message, MessageId, MessageStatus, NewMessage, OwnerId,
    OwnerStats, ValidationError,
};
pub use storage::{CancelOutcome, MemoryMessageStore, MessageStore, PgMessageStore};
pub use time::{Clock, SystemClock, TestClock};
