//! Individual delivery worker.
//!
//! Each worker is an independent loop: lease one task, push the referenced
//! message through the delivery pipeline, repeat. Workers block only on the
//! lease poll, the rate-limiter permit, and the transport call. A failed
//! store or queue operation leaves the lease unacked, so the task is
//! redelivered after the visibility timeout rather than lost.

use std::{sync::Arc, time::Duration};

use maildrip_core::{Clock, Message, MessageStatus, MessageStore};
use maildrip_queue::{DelayQueue, LeasedTask};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::{DeliveryConfig, EngineStats},
    error::Result,
    limiter::HourlyRateLimiter,
    transport::{EmailTransport, OutboundEmail},
};

/// Worker that leases delivery tasks and invokes the transport.
pub struct DeliveryWorker {
    id: usize,
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn DelayQueue>,
    transport: Arc<dyn EmailTransport>,
    limiter: Arc<HourlyRateLimiter>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker with shared engine resources.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn DelayQueue>,
        transport: Arc<dyn EmailTransport>,
        limiter: Arc<HourlyRateLimiter>,
        clock: Arc<dyn Clock>,
        config: DeliveryConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, store, queue, transport, limiter, clock, config, stats, cancellation_token }
    }

    /// Main worker loop: lease and process tasks until cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.poll_once().await {
                Ok(true) => {},
                Ok(false) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Err(err) => {
                    error!(worker_id = self.id, error = %err, "task processing failed");
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Leases and processes at most one task.
    ///
    /// Returns `Ok(true)` if a task was processed, `Ok(false)` if nothing
    /// was ready.
    pub async fn poll_once(&self) -> Result<bool> {
        let Some(lease) = self.queue.lease(self.id).await? else {
            return Ok(false);
        };
        self.process_task(lease).await?;
        Ok(true)
    }

    /// Runs one leased task through the delivery pipeline.
    async fn process_task(&self, lease: LeasedTask) -> Result<()> {
        let message_id = lease.task.message_id;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight += 1;
        }
        let result = self.deliver(&lease).await;
        {
            let mut stats = self.stats.write().await;
            stats.in_flight -= 1;
            stats.processed += 1;
        }

        if let Err(ref err) = result {
            // leave the lease unacked: the task redelivers after expiry
            error!(
                worker_id = self.id,
                message_id = %message_id,
                error = %err,
                "delivery pipeline error, task will redeliver"
            );
        }
        result
    }

    async fn deliver(&self, lease: &LeasedTask) -> Result<()> {
        let message_id = lease.task.message_id;

        // 1. the task only references the message; the row is authoritative
        let Some(message) = self.store.find(message_id).await? else {
            warn!(
                worker_id = self.id,
                message_id = %message_id,
                "task references a missing message, dropping permanently"
            );
            self.queue.ack(lease.clone()).await?;
            return Ok(());
        };

        // 2. re-check status: cancellation wins over delivery, and a
        //    redelivered task for an already-sent message must not send twice
        match message.status {
            MessageStatus::Cancelled => {
                info!(worker_id = self.id, message_id = %message_id, "message cancelled, skipping send");
                self.queue.ack(lease.clone()).await?;
                let mut stats = self.stats.write().await;
                stats.skipped_cancelled += 1;
                return Ok(());
            },
            MessageStatus::Sent => {
                debug!(
                    worker_id = self.id,
                    message_id = %message_id,
                    "message already sent, suppressing duplicate delivery"
                );
                self.queue.ack(lease.clone()).await?;
                return Ok(());
            },
            MessageStatus::Scheduled | MessageStatus::Processing | MessageStatus::Failed => {},
        }

        // 3. claim it; a concurrent cancel between the read above and this
        //    write loses the send, not the cancellation
        let Some(message) = self.store.mark_processing(message_id).await? else {
            info!(
                worker_id = self.id,
                message_id = %message_id,
                "message became terminal before claim, skipping send"
            );
            self.queue.ack(lease.clone()).await?;
            let mut stats = self.stats.write().await;
            stats.skipped_cancelled += 1;
            return Ok(());
        };

        // 4. process-wide hourly throttle; may park this worker
        self.limiter.acquire().await;

        // 5. the send itself
        let outcome = self
            .transport
            .send(OutboundEmail {
                to: message.recipient.clone(),
                subject: message.subject.clone(),
                html_body: message.body.clone(),
            })
            .await;

        match outcome {
            Ok(provider_ref) => {
                self.store.mark_sent(message_id, self.clock.now_utc()).await?;
                self.queue.ack(lease.clone()).await?;
                let mut stats = self.stats.write().await;
                stats.sent += 1;
                drop(stats);
                info!(
                    worker_id = self.id,
                    message_id = %message_id,
                    recipient = %message.recipient,
                    provider_id = %provider_ref.0,
                    attempt = lease.attempt,
                    "email sent"
                );
            },
            Err(err) => {
                self.record_failure(&message, lease, &err.to_string()).await?;
            },
        }

        Ok(())
    }

    /// Records a failed send and hands the task to the queue's retry policy.
    ///
    /// The failure is written to the message row *before* `fail` is called:
    /// if the queue discards the task (attempts exhausted), the terminal
    /// `Failed` state with its error is already durable.
    async fn record_failure(
        &self,
        message: &Message,
        lease: &LeasedTask,
        reason: &str,
    ) -> Result<()> {
        warn!(
            worker_id = self.id,
            message_id = %message.id,
            recipient = %message.recipient,
            attempt = lease.attempt,
            error = %reason,
            "send failed"
        );

        self.store.mark_failed(message.id, reason.to_string()).await?;
        self.queue.fail(lease.clone(), reason.to_string()).await?;

        let mut stats = self.stats.write().await;
        stats.failed += 1;
        Ok(())
    }
}
