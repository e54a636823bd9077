//! Delivery engine facade.
//!
//! Owns the worker pool, the shared rate limiter, and engine statistics.
//! `start` spawns the long-running workers; `drain_ready` processes
//! everything currently leasable on the caller's task, which is what
//! deterministic tests and one-shot maintenance jobs use.

use std::{sync::Arc, time::Duration};

use maildrip_core::{Clock, MessageStore};
use maildrip_queue::DelayQueue;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::Result,
    limiter::HourlyRateLimiter,
    transport::EmailTransport,
    worker::DeliveryWorker,
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// How long an idle worker waits before polling the queue again.
    pub poll_interval: Duration,

    /// Process-wide cap on sends per hour, enforced by the token bucket.
    ///
    /// Independent of any per-batch `hourly_limit` used at allocation time.
    pub max_sends_per_hour: u32,

    /// Maximum time to wait for in-flight deliveries during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            poll_interval: Duration::from_secs(1),
            max_sends_per_hour: crate::DEFAULT_MAX_SENDS_PER_HOUR,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters exposed for monitoring the engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Workers currently spawned.
    pub active_workers: usize,
    /// Tasks taken through the pipeline since startup.
    pub processed: u64,
    /// Successful sends.
    pub sent: u64,
    /// Failed send attempts.
    pub failed: u64,
    /// Tasks skipped because the message was cancelled before the send.
    pub skipped_cancelled: u64,
    /// Tasks currently being processed.
    pub in_flight: u64,
}

/// Coordinates delivery workers over a store, queue, and transport.
pub struct DeliveryEngine {
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn DelayQueue>,
    transport: Arc<dyn EmailTransport>,
    limiter: Arc<HourlyRateLimiter>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl DeliveryEngine {
    /// Creates an engine over the given collaborators.
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn DelayQueue>,
        transport: Arc<dyn EmailTransport>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = Arc::new(HourlyRateLimiter::new(config.max_sends_per_hour, clock.clone()));
        Self {
            store,
            queue,
            transport,
            limiter,
            clock,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
        }
    }

    /// Spawns the worker pool and returns immediately.
    pub async fn start(&mut self) {
        info!(
            worker_count = self.config.worker_count,
            max_sends_per_hour = self.config.max_sends_per_hour,
            "starting delivery engine"
        );

        let mut pool = WorkerPool::new(
            self.store.clone(),
            self.queue.clone(),
            self.transport.clone(),
            self.limiter.clone(),
            self.clock.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        pool.spawn_workers().await;
        self.worker_pool = Some(pool);

        info!("delivery engine started");
    }

    /// Gracefully shuts down, draining in-flight deliveries within the
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers outlive the timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        match self.worker_pool.take() {
            Some(pool) => pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                info!("delivery engine was never started");
                Ok(())
            },
        }
    }

    /// Returns a snapshot of engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Processes every task that is currently ready, on the caller's task.
    ///
    /// Returns the number of tasks processed. Intended for tests and
    /// controlled one-shot draining; does not spawn background workers.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline error encountered.
    pub async fn drain_ready(&self) -> Result<usize> {
        let worker = DeliveryWorker::new(
            0,
            self.store.clone(),
            self.queue.clone(),
            self.transport.clone(),
            self.limiter.clone(),
            self.clock.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );

        let mut processed = 0;
        while worker.poll_once().await? {
            processed += 1;
        }
        Ok(processed)
    }
}
