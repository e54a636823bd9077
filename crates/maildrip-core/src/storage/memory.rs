//! In-memory message store.
//!
//! Deterministic twin of the Postgres store for tests and broker-less
//! development. Applies the same status-transition guards so tests exercise
//! the real state machine, not a lenient double.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    models::{Message, MessageId, MessageStatus, NewMessage, OwnerId, OwnerStats},
    storage::{CancelOutcome, MessageStore, StoreFuture},
};

/// Message store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<MessageId, Message>>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages, for test assertions.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Whether the store holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl MessageStore for MemoryMessageStore {
    fn create_batch(&self, messages: Vec<NewMessage>) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let now = Utc::now();
            let mut map = self.messages.write().await;
            let mut created = Vec::with_capacity(messages.len());

            for new in messages {
                let message = Message {
                    id: MessageId::new(),
                    owner: new.owner,
                    recipient: new.recipient,
                    subject: new.subject,
                    body: new.body,
                    status: MessageStatus::Scheduled,
                    scheduled_time: new.scheduled_time,
                    sent_time: None,
                    error: None,
                    batch_start: new.batch_start,
                    batch_delay_seconds: new.batch_delay_seconds,
                    batch_hourly_limit: new.batch_hourly_limit,
                    created_at: now,
                };
                map.insert(message.id, message.clone());
                created.push(message);
            }

            Ok(created)
        })
    }

    fn find(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move { Ok(self.messages.read().await.get(&id).cloned()) })
    }

    fn find_owned(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            Ok(self
                .messages
                .read()
                .await
                .get(&id)
                .filter(|m| m.owner == owner)
                .cloned())
        })
    }

    fn mark_processing(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            let mut map = self.messages.write().await;
            let Some(message) = map.get_mut(&id) else {
                return Ok(None);
            };
            if !message.status.can_transition_to(MessageStatus::Processing) {
                return Ok(None);
            }
            message.status = MessageStatus::Processing;
            Ok(Some(message.clone()))
        })
    }

    fn mark_sent(&self, id: MessageId, sent_time: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut map = self.messages.write().await;
            let Some(message) = map.get_mut(&id) else {
                return Err(CoreError::NotFound(format!("message {id}")));
            };
            if message.status != MessageStatus::Processing {
                return Err(CoreError::InvalidTransition(format!(
                    "message {id} is {}, cannot mark sent",
                    message.status
                )));
            }
            message.status = MessageStatus::Sent;
            message.sent_time = Some(sent_time);
            message.error = None;
            Ok(())
        })
    }

    fn mark_failed(&self, id: MessageId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut map = self.messages.write().await;
            let Some(message) = map.get_mut(&id) else {
                return Err(CoreError::NotFound(format!("message {id}")));
            };
            if message.status != MessageStatus::Processing {
                return Err(CoreError::InvalidTransition(format!(
                    "message {id} is {}, cannot mark failed",
                    message.status
                )));
            }
            message.status = MessageStatus::Failed;
            message.error = Some(error);
            Ok(())
        })
    }

    fn cancel(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(async move {
            let mut map = self.messages.write().await;
            let Some(message) = map.get_mut(&id) else {
                return Ok(CancelOutcome::NotFound);
            };
            if message.owner != owner {
                return Ok(CancelOutcome::NotFound);
            }
            if message.status != MessageStatus::Scheduled {
                return Ok(CancelOutcome::NotCancellable(message.status));
            }
            message.status = MessageStatus::Cancelled;
            Ok(CancelOutcome::Cancelled)
        })
    }

    fn delete(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut map = self.messages.write().await;
            match map.get(&id) {
                Some(message) if message.owner == owner => {
                    map.remove(&id);
                    Ok(true)
                },
                _ => Ok(false),
            }
        })
    }

    fn list_by_owner(
        &self,
        owner: OwnerId,
        status: Option<MessageStatus>,
    ) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let map = self.messages.read().await;
            let mut messages: Vec<Message> = map
                .values()
                .filter(|m| m.owner == owner)
                .filter(|m| status.is_none_or(|s| m.status == s))
                .cloned()
                .collect();
            messages.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));
            Ok(messages)
        })
    }

    fn stats(&self, owner: OwnerId) -> StoreFuture<'_, OwnerStats> {
        Box::pin(async move {
            let map = self.messages.read().await;
            let mut stats = OwnerStats::default();
            for message in map.values().filter(|m| m.owner == owner) {
                match message.status {
                    MessageStatus::Scheduled => stats.scheduled += 1,
                    MessageStatus::Sent => stats.sent += 1,
                    MessageStatus::Failed => stats.failed += 1,
                    MessageStatus::Processing | MessageStatus::Cancelled => {},
                }
            }
            Ok(stats)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}
