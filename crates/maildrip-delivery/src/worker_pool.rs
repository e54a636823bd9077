//! Worker pool lifecycle management.
//!
//! Spawns the configured number of delivery workers as supervised tokio
//! tasks and coordinates graceful shutdown: signal cancellation, wait for
//! in-flight deliveries to finish, bounded by the shutdown timeout.

use std::{sync::Arc, time::Duration};

use maildrip_core::{Clock, MessageStore};
use maildrip_queue::DelayQueue;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    engine::{DeliveryConfig, EngineStats},
    error::{DeliveryError, Result},
    limiter::HourlyRateLimiter,
    transport::EmailTransport,
    worker::DeliveryWorker,
};

/// Supervised set of delivery workers.
pub struct WorkerPool {
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn DelayQueue>,
    transport: Arc<dyn EmailTransport>,
    limiter: Arc<HourlyRateLimiter>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Creates a pool; workers start only when `spawn_workers` is called.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn DelayQueue>,
        transport: Arc<dyn EmailTransport>,
        limiter: Arc<HourlyRateLimiter>,
        clock: Arc<dyn Clock>,
        config: DeliveryConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            transport,
            limiter,
            clock,
            config,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns all configured workers and returns immediately.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.store.clone(),
                self.queue.clone(),
                self.transport.clone(),
                self.limiter.clone(),
                self.clock.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(ref err) = result {
                    error!(worker_id, error = %err, "delivery worker terminated with error");
                }
                result
            });

            self.worker_handles.push(handle);
        }
    }

    /// Signals cancellation and waits for workers to finish, bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers are still running when the
    /// timeout expires.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "shutting down worker pool"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.stats.clone();
        let drain = async move {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(err)) => {
                        warn!(worker_id, error = %err, "worker finished with error during shutdown");
                    },
                    Err(join_err) => {
                        error!(worker_id, error = %join_err, "worker task panicked");
                        return Err(DeliveryError::WorkerPanic {
                            worker_id,
                            message: join_err.to_string(),
                        });
                    },
                }
            }
            stats.write().await.active_workers = 0;
            Ok(())
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => {
                info!("worker pool shutdown complete");
                result
            },
            Err(_) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active,
                "worker pool dropped without shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}
