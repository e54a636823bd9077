//! PostgreSQL message store.
//!
//! Plain `sqlx::query`/`query_as` against the `messages` table. Status
//! transitions are guarded in SQL (`WHERE status IN (...)`), so concurrent
//! writers cannot regress the state machine no matter how requests
//! interleave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Message, MessageId, MessageStatus, NewMessage, OwnerId, OwnerStats},
    storage::{CancelOutcome, MessageStore, StoreFuture},
};

const MESSAGE_COLUMNS: &str = "id, owner_id AS owner, recipient, subject, body, status, \
     scheduled_time, sent_time, error, batch_start, batch_delay_seconds, \
     batch_hourly_limit, created_at";

/// Message store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: Arc<PgPool>,
}

impl PgMessageStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn fetch(&self, id: MessageId) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(message)
    }
}

impl MessageStore for PgMessageStore {
    fn create_batch(&self, messages: Vec<NewMessage>) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;
            let mut created = Vec::with_capacity(messages.len());

            for new in messages {
                let message = sqlx::query_as::<_, Message>(&format!(
                    r#"
                    INSERT INTO messages (
                        id, owner_id, recipient, subject, body, status,
                        scheduled_time, batch_start, batch_delay_seconds,
                        batch_hourly_limit, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ))
                .bind(MessageId::new())
                .bind(&new.owner)
                .bind(&new.recipient)
                .bind(&new.subject)
                .bind(&new.body)
                .bind(MessageStatus::Scheduled.to_string())
                .bind(new.scheduled_time)
                .bind(new.batch_start)
                .bind(new.batch_delay_seconds)
                .bind(new.batch_hourly_limit)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;

                created.push(message);
            }

            tx.commit().await?;
            Ok(created)
        })
    }

    fn find(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(self.fetch(id))
    }

    fn find_owned(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            let message = sqlx::query_as::<_, Message>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND owner_id = $2"
            ))
            .bind(id)
            .bind(owner)
            .fetch_optional(&*self.pool)
            .await?;
            Ok(message)
        })
    }

    fn mark_processing(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            let message = sqlx::query_as::<_, Message>(&format!(
                r#"
                UPDATE messages
                SET status = 'processing'
                WHERE id = $1 AND status IN ('scheduled', 'failed', 'processing')
                RETURNING {MESSAGE_COLUMNS}
                "#
            ))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
            Ok(message)
        })
    }

    fn mark_sent(&self, id: MessageId, sent_time: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE messages
                SET status = 'sent', sent_time = $2, error = NULL
                WHERE id = $1 AND status = 'processing'
                "#,
            )
            .bind(id)
            .bind(sent_time)
            .execute(&*self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::InvalidTransition(format!(
                    "message {id} is not processing, cannot mark sent"
                )));
            }
            Ok(())
        })
    }

    fn mark_failed(&self, id: MessageId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE messages
                SET status = 'failed', error = $2
                WHERE id = $1 AND status = 'processing'
                "#,
            )
            .bind(id)
            .bind(error)
            .execute(&*self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::InvalidTransition(format!(
                    "message {id} is not processing, cannot mark failed"
                )));
            }
            Ok(())
        })
    }

    fn cancel(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE messages
                SET status = 'cancelled'
                WHERE id = $1 AND owner_id = $2 AND status = 'scheduled'
                "#,
            )
            .bind(id)
            .bind(&owner)
            .execute(&*self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(CancelOutcome::Cancelled);
            }

            // distinguish "gone" from "already past scheduled"
            match self.find_owned(id, owner).await? {
                Some(message) => Ok(CancelOutcome::NotCancellable(message.status)),
                None => Ok(CancelOutcome::NotFound),
            }
        })
    }

    fn delete(&self, id: MessageId, owner: OwnerId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM messages WHERE id = $1 AND owner_id = $2")
                .bind(id)
                .bind(owner)
                .execute(&*self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list_by_owner(
        &self,
        owner: OwnerId,
        status: Option<MessageStatus>,
    ) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let messages = match status {
                Some(status) => {
                    sqlx::query_as::<_, Message>(&format!(
                        r#"
                        SELECT {MESSAGE_COLUMNS} FROM messages
                        WHERE owner_id = $1 AND status = $2
                        ORDER BY scheduled_time DESC
                        "#
                    ))
                    .bind(owner)
                    .bind(status.to_string())
                    .fetch_all(&*self.pool)
                    .await?
                },
                None => {
                    sqlx::query_as::<_, Message>(&format!(
                        r#"
                        SELECT {MESSAGE_COLUMNS} FROM messages
                        WHERE owner_id = $1
                        ORDER BY scheduled_time DESC
                        "#
                    ))
                    .bind(owner)
                    .fetch_all(&*self.pool)
                    .await?
                },
            };
            Ok(messages)
        })
    }

    fn stats(&self, owner: OwnerId) -> StoreFuture<'_, OwnerStats> {
        Box::pin(async move {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT status, COUNT(*) FROM messages WHERE owner_id = $1 GROUP BY status",
            )
            .bind(owner)
            .fetch_all(&*self.pool)
            .await?;

            let mut stats = OwnerStats::default();
            for (status, count) in rows {
                match MessageStatus::parse(&status) {
                    Some(MessageStatus::Scheduled) => stats.scheduled = count,
                    Some(MessageStatus::Sent) => stats.sent = count,
                    Some(MessageStatus::Failed) => stats.failed = count,
                    _ => {},
                }
            }
            Ok(stats)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
            Ok(())
        })
    }
}
