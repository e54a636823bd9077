//! Message store contract and implementations.
//!
//! The store is the only writer of message state, and its transition
//! operations carry the state-machine guards: a concurrent cancel and
//! worker claim race is settled here, not by callers. Production uses
//! [`PgMessageStore`]; deterministic tests and broker-less development use
//! [`MemoryMessageStore`]. Both enforce identical transition rules.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{Message, MessageId, MessageStatus, NewMessage, OwnerId, OwnerStats},
};

mod memory;
mod postgres;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outcome of an owner-scoped cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The message was `Scheduled` and is now `Cancelled`.
    Cancelled,
    /// The message exists but has left `Scheduled`; cancellation no longer
    /// applies. Carries the status observed at the time of the attempt.
    NotCancellable(MessageStatus),
    /// No message with this id belongs to the owner.
    NotFound,
}

/// Storage operations for scheduled messages.
///
/// Mutating operations enforce the status state machine: updates are
/// conditional on the current status, so a lost race surfaces as a `None` or
/// an [`CancelOutcome::NotCancellable`] rather than a silently clobbered
/// row.
pub trait MessageStore: Send + Sync + 'static {
    /// Persists a batch of messages, all or nothing.
    ///
    /// Assigns ids and creation timestamps; every row starts `Scheduled`.
    fn create_batch(&self, messages: Vec<NewMessage>) -> StoreFuture<'_, Vec<Message>>;

    /// Point lookup by id, regardless of owner.
    fn find(&self, id: MessageId) -> StoreFuture<'_, Option<Message>>;

    /// Point lookup scoped to an owner. Foreign ids read as absent.
    fn find_owned(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, Option<Message>>;

    /// Claims the message for delivery: transitions to `Processing`.
    ///
    /// Succeeds from `Scheduled`, `Failed` (queue-driven retry), or
    /// `Processing` (redelivery after a crashed worker). Returns the updated
    /// row, or `None` when the message is missing or in a terminal state —
    /// the caller must then skip the send.
    fn mark_processing(&self, id: MessageId) -> StoreFuture<'_, Option<Message>>;

    /// Records a successful send: `Processing` -> `Sent`, sets `sent_time`.
    fn mark_sent(&self, id: MessageId, sent_time: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Records a failed send: `Processing` -> `Failed`, sets `error`.
    fn mark_failed(&self, id: MessageId, error: String) -> StoreFuture<'_, ()>;

    /// Owner-scoped cancellation; only `Scheduled` messages can be
    /// cancelled.
    fn cancel(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, CancelOutcome>;

    /// Owner-scoped physical deletion. Returns whether a row was removed.
    fn delete(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, bool>;

    /// All messages for an owner, optionally filtered by status, newest
    /// `scheduled_time` first.
    fn list_by_owner(
        &self,
        owner: OwnerId,
        status: Option<MessageStatus>,
    ) -> StoreFuture<'_, Vec<Message>>;

    /// Scheduled/sent/failed counts for an owner.
    fn stats(&self, owner: OwnerId) -> StoreFuture<'_, OwnerStats>;

    /// Liveness probe for readiness checks.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
