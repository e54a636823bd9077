//! Batch scheduling service.
//!
//! The submission entry point and the owner-scoped message operations the
//! HTTP surface exposes. Submission is synchronous: validation, allocation,
//! persistence, and enqueueing all happen before the caller gets its
//! receipt, so a returned `scheduled_count` means every message is both
//! stored and queued.

use std::sync::Arc;

use maildrip_core::{
    allocate, dedupe_key_for, BatchRequest, CancelOutcome, Clock, Message, MessageId,
    MessageStatus, MessageStore, NewMessage, OwnerId, OwnerStats,
};
use maildrip_queue::{DelayQueue, DeliveryTask};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;

/// Receipt returned to the submitter.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchReceipt {
    /// Number of messages persisted and enqueued.
    pub scheduled_count: usize,
}

/// Validates, allocates, persists, and enqueues batches; serves the
/// owner-scoped read/cancel/delete operations.
pub struct BatchScheduler {
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn DelayQueue>,
    clock: Arc<dyn Clock>,
}

impl BatchScheduler {
    /// Creates a scheduler over the given collaborators.
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn DelayQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, queue, clock }
    }

    /// Submits a batch: one message and one delayed task per recipient.
    ///
    /// Dispatch times come from the time-bucket allocator and are final at
    /// submission; retries later reuse them, never recompute them.
    ///
    /// # Errors
    ///
    /// `Validation` if the request is malformed (nothing persisted);
    /// `Unavailable` if the store rejects the batch or the queue cannot
    /// accept tasks. In the latter case the messages that could not be
    /// enqueued are cancelled before returning, so no message is left
    /// `Scheduled` without a queue entry.
    pub async fn submit(
        &self,
        owner: OwnerId,
        request: BatchRequest,
    ) -> Result<BatchReceipt, ApiError> {
        request.validate()?;

        let times = allocate(
            request.start_time,
            request.delay_seconds,
            request.hourly_limit,
            request.recipients.len(),
        );

        let delay_seconds = i32::try_from(request.delay_seconds).unwrap_or(i32::MAX);
        let hourly_limit = i32::try_from(request.hourly_limit).unwrap_or(i32::MAX);
        let new_messages: Vec<NewMessage> = request
            .recipients
            .iter()
            .zip(&times)
            .map(|(recipient, scheduled_time)| NewMessage {
                owner: owner.clone(),
                recipient: recipient.clone(),
                subject: request.subject.clone(),
                body: request.body.clone(),
                scheduled_time: *scheduled_time,
                batch_start: request.start_time,
                batch_delay_seconds: delay_seconds,
                batch_hourly_limit: hourly_limit,
            })
            .collect();

        let messages = self.store.create_batch(new_messages).await?;

        for (index, message) in messages.iter().enumerate() {
            let task = DeliveryTask {
                message_id: message.id,
                recipient: message.recipient.clone(),
            };
            if let Err(err) =
                self.queue.enqueue(task, message.scheduled_time, message.dedupe_key()).await
            {
                warn!(
                    error = %err,
                    enqueued = index,
                    total = messages.len(),
                    "queue rejected enqueue mid-batch, cancelling the remainder"
                );
                self.cancel_unqueued(&owner, &messages[index..]).await;
                return Err(ApiError::Unavailable(format!(
                    "queue rejected the batch after {index} of {} messages; \
                     the remainder was cancelled: {err}",
                    messages.len()
                )));
            }
        }

        info!(
            owner = %owner,
            scheduled_count = messages.len(),
            start_time = %request.start_time,
            "batch scheduled"
        );
        Ok(BatchReceipt { scheduled_count: messages.len() })
    }

    /// Best-effort cancellation of messages whose tasks never reached the
    /// queue, so they cannot linger `Scheduled` forever.
    async fn cancel_unqueued(&self, owner: &OwnerId, messages: &[Message]) {
        for message in messages {
            if let Err(err) = self.store.cancel(message.id, owner.clone()).await {
                warn!(
                    message_id = %message.id,
                    error = %err,
                    "failed to cancel un-enqueued message"
                );
            }
        }
    }

    /// One message, scoped to its owner.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids and foreign owners alike.
    pub async fn get(&self, owner: OwnerId, id: MessageId) -> Result<Message, ApiError> {
        self.store.find_owned(id, owner).await?.ok_or(ApiError::NotFound)
    }

    /// All of an owner's messages, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be read.
    pub async fn list(
        &self,
        owner: OwnerId,
        status: Option<MessageStatus>,
    ) -> Result<Vec<Message>, ApiError> {
        Ok(self.store.list_by_owner(owner, status).await?)
    }

    /// Scheduled/sent/failed counts for an owner.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be read.
    pub async fn stats(&self, owner: OwnerId) -> Result<OwnerStats, ApiError> {
        Ok(self.store.stats(owner).await?)
    }

    /// Cancels a scheduled message and removes its pending queue task.
    ///
    /// The status flip comes first: once a message reads `Cancelled`, a
    /// worker that races us on the queue side will skip the send anyway.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown/foreign ids, `Conflict` if the message has
    /// already left `Scheduled`.
    pub async fn cancel(&self, owner: OwnerId, id: MessageId) -> Result<(), ApiError> {
        match self.store.cancel(id, owner).await? {
            CancelOutcome::Cancelled => {
                let removed = self.queue.cancel(dedupe_key_for(id)).await?;
                info!(message_id = %id, task_removed = removed, "message cancelled");
                Ok(())
            },
            CancelOutcome::NotCancellable(status) => {
                Err(ApiError::Conflict(format!("message is already {status}")))
            },
            CancelOutcome::NotFound => Err(ApiError::NotFound),
        }
    }

    /// Deletes a message outright, removing any pending queue task first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown/foreign ids.
    pub async fn delete(&self, owner: OwnerId, id: MessageId) -> Result<(), ApiError> {
        // verify ownership before touching the queue
        if self.store.find_owned(id, owner.clone()).await?.is_none() {
            return Err(ApiError::NotFound);
        }
        self.queue.cancel(dedupe_key_for(id)).await?;
        if self.store.delete(id, owner).await? {
            info!(message_id = %id, "message deleted");
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    /// The clock the scheduler was built with, for handlers needing "now".
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
