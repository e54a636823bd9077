//! PostgreSQL delay queue.
//!
//! A `delivery_tasks` table doubles as the delayed queue: rows become
//! leasable once `ready_at` passes, and `FOR UPDATE SKIP LOCKED` hands each
//! ready row to exactly one polling worker without blocking the others.
//! A unique index on `dedupe_key` makes enqueue idempotent, and `leased_until`
//! implements the visibility timeout — a crashed worker's row is reclaimed
//! by whoever polls after the lease expires.

use std::{sync::Arc, time::Duration};

use sqlx::PgPool;
use tracing::{debug, warn};

use crate::{
    error::Result,
    retry::{RetryDecision, RetryPolicy},
    DelayQueue, DeliveryTask, LeasedTask, QueueFuture,
};

/// Delay queue backed by a PostgreSQL table.
#[derive(Clone)]
pub struct PgDelayQueue {
    pool: Arc<PgPool>,
    lease_duration: Duration,
    retry: RetryPolicy,
}

impl PgDelayQueue {
    /// Creates a queue over an existing connection pool.
    pub fn new(pool: PgPool, lease_duration: Duration, retry: RetryPolicy) -> Self {
        Self { pool: Arc::new(pool), lease_duration, retry }
    }

    /// Creates a queue with default lease duration and retry policy.
    pub fn with_defaults(pool: PgPool) -> Self {
        Self::new(pool, crate::DEFAULT_LEASE_DURATION, RetryPolicy::default())
    }
}

impl DelayQueue for PgDelayQueue {
    fn enqueue(
        &self,
        task: DeliveryTask,
        ready_at: chrono::DateTime<chrono::Utc>,
        dedupe_key: String,
    ) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let payload = serde_json::to_value(&task)?;
            sqlx::query(
                r#"
                INSERT INTO delivery_tasks (dedupe_key, payload, ready_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (dedupe_key) DO NOTHING
                "#,
            )
            .bind(dedupe_key)
            .bind(payload)
            .bind(ready_at)
            .execute(&*self.pool)
            .await?;
            Ok(())
        })
    }

    fn lease(&self, worker_id: usize) -> QueueFuture<'_, Option<LeasedTask>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            // one ready row, skipping anything another worker holds locked
            let row: Option<(i64,)> = sqlx::query_as(
                r#"
                SELECT id FROM delivery_tasks
                WHERE ready_at <= NOW()
                  AND (leased_until IS NULL OR leased_until <= NOW())
                ORDER BY ready_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
                "#,
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some((id,)) = row else {
                tx.rollback().await?;
                return Ok(None);
            };

            let lease_seconds = i64::try_from(self.lease_duration.as_secs()).unwrap_or(60);
            let (dedupe_key, payload, attempts): (String, serde_json::Value, i32) =
                sqlx::query_as(
                    r#"
                    UPDATE delivery_tasks
                    SET leased_until = NOW() + make_interval(secs => $2),
                        leased_by = $3,
                        attempts = attempts + 1
                    WHERE id = $1
                    RETURNING dedupe_key, payload, attempts
                    "#,
                )
                .bind(id)
                .bind(lease_seconds as f64)
                .bind(format!("worker-{worker_id}"))
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;

            let task: DeliveryTask = serde_json::from_value(payload)?;
            let attempt = u32::try_from(attempts).unwrap_or(u32::MAX);
            debug!(worker_id, task_id = id, attempt, "task leased");

            Ok(Some(LeasedTask { task_id: id, task, dedupe_key, attempt }))
        })
    }

    fn ack(&self, lease: LeasedTask) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM delivery_tasks WHERE id = $1")
                .bind(lease.task_id)
                .execute(&*self.pool)
                .await?;
            Ok(())
        })
    }

    fn fail(&self, lease: LeasedTask, reason: String) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            match self.retry.decide(lease.attempt) {
                RetryDecision::RetryAfter(delay) => {
                    let delay_seconds = delay.as_secs_f64();
                    debug!(
                        task_id = lease.task_id,
                        attempt = lease.attempt,
                        delay_seconds,
                        %reason,
                        "task failed, retry scheduled"
                    );
                    sqlx::query(
                        r#"
                        UPDATE delivery_tasks
                        SET ready_at = NOW() + make_interval(secs => $2),
                            leased_until = NULL,
                            leased_by = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(lease.task_id)
                    .bind(delay_seconds)
                    .execute(&*self.pool)
                    .await?;
                },
                RetryDecision::Discard => {
                    warn!(
                        task_id = lease.task_id,
                        attempts = lease.attempt,
                        %reason,
                        "task discarded after exhausting attempts"
                    );
                    sqlx::query("DELETE FROM delivery_tasks WHERE id = $1")
                        .bind(lease.task_id)
                        .execute(&*self.pool)
                        .await?;
                },
            }
            Ok(())
        })
    }

    fn cancel(&self, dedupe_key: String) -> QueueFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                DELETE FROM delivery_tasks
                WHERE dedupe_key = $1
                  AND (leased_until IS NULL OR leased_until <= NOW())
                "#,
            )
            .bind(dedupe_key)
            .execute(&*self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}
