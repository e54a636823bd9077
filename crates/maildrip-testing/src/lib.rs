//! Deterministic test environment for the scheduling and delivery pipeline.
//!
//! Wires the in-memory store and queue, the scriptable mock transport, and
//! the manually advanced test clock into a complete engine. Time only moves
//! when a test says so, so readiness, lease expiry, retry backoff, and
//! rate-limiter refill are all reproducible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use maildrip_api::{BatchReceipt, BatchScheduler};
use maildrip_core::{
    BatchRequest, MemoryMessageStore, Message, MessageId, MessageStatus, MessageStore, OwnerId,
    OwnerStats, TestClock,
};
use maildrip_delivery::{transport::mock::MockTransport, DeliveryConfig, DeliveryEngine};
use maildrip_queue::{MemoryDelayQueue, RetryPolicy};

pub mod fixtures;
pub mod invariants;

pub use fixtures::BatchBuilder;

/// Complete in-memory environment under test control.
pub struct TestEnv {
    /// Manually advanced clock shared by every component.
    pub clock: TestClock,
    /// In-memory message store.
    pub store: Arc<MemoryMessageStore>,
    /// In-memory delay queue.
    pub queue: Arc<MemoryDelayQueue>,
    /// Scriptable transport recording every send.
    pub transport: Arc<MockTransport>,
    /// The submission service.
    pub scheduler: BatchScheduler,
    engine: DeliveryEngine,
}

impl TestEnv {
    /// Environment with default policies (retries on, limiter at default).
    pub fn new() -> Self {
        TestEnvBuilder::default().build()
    }

    /// Builder for customized policies.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    /// Submits a batch as `owner`.
    ///
    /// # Errors
    ///
    /// Propagates scheduler errors (validation, queue unavailability).
    pub async fn submit(&self, owner: &str, request: BatchRequest) -> Result<BatchReceipt> {
        self.scheduler
            .submit(OwnerId::from(owner), request)
            .await
            .context("batch submission failed")
    }

    /// Processes every currently-ready task, returning how many ran.
    ///
    /// # Errors
    ///
    /// Propagates the first delivery pipeline error.
    pub async fn drain(&self) -> Result<usize> {
        self.engine.drain_ready().await.context("drain failed")
    }

    /// Advances the shared clock.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Advances the clock and drains, as one step.
    ///
    /// # Errors
    ///
    /// Propagates the first delivery pipeline error.
    pub async fn advance_and_drain(&self, duration: Duration) -> Result<usize> {
        self.advance(duration);
        self.drain().await
    }

    /// Fetches a message by id, failing the test if it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not exist.
    pub async fn message(&self, id: MessageId) -> Result<Message> {
        self.store
            .find(id)
            .await
            .context("store read failed")?
            .context("message not found")
    }

    /// Asserts a message's current status.
    ///
    /// # Panics
    ///
    /// Panics if the message is missing or in a different status.
    pub async fn assert_status(&self, id: MessageId, expected: MessageStatus) {
        let message = self.message(id).await.expect("message should exist");
        assert_eq!(
            message.status, expected,
            "message {id} expected {expected}, found {}",
            message.status
        );
    }

    /// Owner stats shortcut.
    ///
    /// # Errors
    ///
    /// Propagates store read errors.
    pub async fn stats(&self, owner: &str) -> Result<OwnerStats> {
        Ok(self.store.stats(OwnerId::from(owner)).await?)
    }

    /// Engine statistics snapshot.
    pub async fn engine_stats(&self) -> maildrip_delivery::EngineStats {
        self.engine.stats().await
    }
}

/// Builder customizing the environment's policies.
pub struct TestEnvBuilder {
    retry_policy: RetryPolicy,
    lease_duration: Duration,
    max_sends_per_hour: u32,
    start: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            // deterministic retries: no jitter under test
            retry_policy: RetryPolicy {
                jitter_factor: 0.0,
                ..RetryPolicy::default()
            },
            lease_duration: Duration::from_secs(60),
            // high enough that unrelated tests never hit the throttle
            max_sends_per_hour: 1_000_000,
            start: None,
        }
    }
}

impl TestEnvBuilder {
    /// Overrides the queue retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the queue lease duration.
    #[must_use]
    pub fn lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Overrides the process-wide hourly send cap.
    #[must_use]
    pub fn max_sends_per_hour(mut self, cap: u32) -> Self {
        self.max_sends_per_hour = cap;
        self
    }

    /// Sets the clock's starting instant.
    #[must_use]
    pub fn starting_at(mut self, start: chrono::DateTime<chrono::Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Assembles the environment.
    pub fn build(self) -> TestEnv {
        let clock = match self.start {
            Some(start) => TestClock::starting_at(start),
            None => TestClock::new(),
        };
        let clock_handle: Arc<dyn maildrip_core::Clock> = Arc::new(clock.clone());

        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(MemoryDelayQueue::new(
            clock_handle.clone(),
            self.lease_duration,
            self.retry_policy,
        ));
        let transport = Arc::new(MockTransport::new());

        let scheduler =
            BatchScheduler::new(store.clone(), queue.clone(), clock_handle.clone());

        let config = DeliveryConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(10),
            max_sends_per_hour: self.max_sends_per_hour,
            ..DeliveryConfig::default()
        };
        let engine = DeliveryEngine::new(
            store.clone(),
            queue.clone(),
            transport.clone(),
            config,
            clock_handle,
        );

        TestEnv { clock, store, queue, transport, scheduler, engine }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
