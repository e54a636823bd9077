//! In-memory delay queue.
//!
//! Clock-driven implementation with the same observable semantics as the
//! Postgres queue: ready-time visibility, exclusive leases with expiry,
//! dedupe-keyed idempotent enqueue, and policy-driven retry. Used by
//! deterministic tests and broker-less development.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use maildrip_core::Clock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    error::Result,
    retry::{RetryDecision, RetryPolicy},
    DelayQueue, DeliveryTask, LeasedTask, QueueFuture,
};

#[derive(Debug, Clone)]
struct QueuedTask {
    id: i64,
    task: DeliveryTask,
    dedupe_key: String,
    attempts: u32,
}

#[derive(Debug)]
struct InFlight {
    entry: QueuedTask,
    lease_deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    /// Pending tasks ordered by (ready_at, id).
    pending: BTreeMap<(DateTime<Utc>, i64), QueuedTask>,
    /// Leased tasks by id.
    leased: HashMap<i64, InFlight>,
    /// Dedupe key -> pending position, for cancel and dedupe checks.
    pending_keys: HashMap<String, (DateTime<Utc>, i64)>,
    /// Dedupe keys of currently leased tasks.
    leased_keys: HashMap<String, i64>,
}

/// Delay queue held entirely in process memory.
pub struct MemoryDelayQueue {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
    retry: RetryPolicy,
}

impl MemoryDelayQueue {
    /// Creates a queue with the given lease duration and retry policy.
    pub fn new(clock: Arc<dyn Clock>, lease_duration: Duration, retry: RetryPolicy) -> Self {
        Self { state: Mutex::new(State::default()), clock, lease_duration, retry }
    }

    /// Creates a queue with default lease duration and retry policy.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, crate::DEFAULT_LEASE_DURATION, RetryPolicy::default())
    }

    /// Number of pending (not leased) tasks, for test assertions.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Number of currently leased tasks, for test assertions.
    pub async fn leased_len(&self) -> usize {
        self.state.lock().await.leased.len()
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Returns expired leases to the pending set, preserving attempt counts.
    fn reclaim_expired(state: &mut State, now: DateTime<Utc>) {
        let expired: Vec<i64> = state
            .leased
            .iter()
            .filter(|(_, in_flight)| in_flight.lease_deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(in_flight) = state.leased.remove(&id) {
                let entry = in_flight.entry;
                debug!(task_id = id, dedupe_key = %entry.dedupe_key, "lease expired, redelivering");
                state.leased_keys.remove(&entry.dedupe_key);
                state.pending_keys.insert(entry.dedupe_key.clone(), (now, entry.id));
                state.pending.insert((now, entry.id), entry);
            }
        }
    }
}

impl DelayQueue for MemoryDelayQueue {
    fn enqueue(
        &self,
        task: DeliveryTask,
        ready_at: DateTime<Utc>,
        dedupe_key: String,
    ) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.pending_keys.contains_key(&dedupe_key)
                || state.leased_keys.contains_key(&dedupe_key)
            {
                debug!(%dedupe_key, "duplicate enqueue ignored");
                return Ok(());
            }

            state.next_id += 1;
            let id = state.next_id;
            let entry = QueuedTask { id, task, dedupe_key: dedupe_key.clone(), attempts: 0 };
            state.pending_keys.insert(dedupe_key, (ready_at, id));
            state.pending.insert((ready_at, id), entry);
            Ok(())
        })
    }

    fn lease(&self, worker_id: usize) -> QueueFuture<'_, Option<LeasedTask>> {
        Box::pin(async move {
            let now = self.clock.now_utc();
            let mut state = self.state.lock().await;

            Self::reclaim_expired(&mut state, now);

            let Some((&key, _)) =
                state.pending.range(..=(now, i64::MAX)).next()
            else {
                return Ok(None);
            };

            let Some(mut entry) = state.pending.remove(&key) else {
                return Ok(None);
            };
            state.pending_keys.remove(&entry.dedupe_key);
            entry.attempts += 1;

            let leased = LeasedTask {
                task_id: entry.id,
                task: entry.task.clone(),
                dedupe_key: entry.dedupe_key.clone(),
                attempt: entry.attempts,
            };
            debug!(
                worker_id,
                task_id = entry.id,
                attempt = entry.attempts,
                "task leased"
            );
            state.leased_keys.insert(entry.dedupe_key.clone(), entry.id);
            state
                .leased
                .insert(entry.id, InFlight { entry, lease_deadline: self.lease_deadline(now) });

            Ok(Some(leased))
        })
    }

    fn ack(&self, lease: LeasedTask) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.leased.remove(&lease.task_id).is_some() {
                state.leased_keys.remove(&lease.dedupe_key);
            }
            Ok(())
        })
    }

    fn fail(&self, lease: LeasedTask, reason: String) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let now = self.clock.now_utc();
            let mut state = self.state.lock().await;

            let Some(in_flight) = state.leased.remove(&lease.task_id) else {
                // lease already expired and was reclaimed; nothing to do
                return Ok(());
            };
            let entry = in_flight.entry;
            state.leased_keys.remove(&entry.dedupe_key);

            match self.retry.decide(entry.attempts) {
                RetryDecision::RetryAfter(delay) => {
                    let ready_at = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    debug!(
                        task_id = entry.id,
                        attempt = entry.attempts,
                        retry_at = %ready_at,
                        %reason,
                        "task failed, retry scheduled"
                    );
                    state.pending_keys.insert(entry.dedupe_key.clone(), (ready_at, entry.id));
                    state.pending.insert((ready_at, entry.id), entry);
                },
                RetryDecision::Discard => {
                    warn!(
                        task_id = entry.id,
                        attempts = entry.attempts,
                        %reason,
                        "task discarded after exhausting attempts"
                    );
                },
            }
            Ok(())
        })
    }

    fn cancel(&self, dedupe_key: String) -> QueueFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(position) = state.pending_keys.remove(&dedupe_key) else {
                // absent or leased; a leased task is its worker's problem
                return Ok(false);
            };
            state.pending.remove(&position);
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use maildrip_core::{MessageId, TestClock};

    use super::*;

    fn task(recipient: &str) -> (DeliveryTask, String) {
        let id = MessageId::new();
        (
            DeliveryTask { message_id: id, recipient: recipient.to_string() },
            format!("msg-{id}"),
        )
    }

    fn queue(clock: &TestClock) -> MemoryDelayQueue {
        MemoryDelayQueue::new(
            Arc::new(clock.clone()),
            Duration::from_secs(60),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(60),
                jitter_factor: 0.0,
                backoff: crate::Backoff::Fixed,
            },
        )
    }

    #[tokio::test]
    async fn task_invisible_before_ready_at() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");

        let ready_at = clock.now_utc() + chrono::Duration::seconds(30);
        queue.enqueue(t, ready_at, key).await.unwrap();

        assert!(queue.lease(0).await.unwrap().is_none());
        clock.advance(Duration::from_secs(30));
        assert!(queue.lease(0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_dedupe_key_is_a_noop() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");

        queue.enqueue(t.clone(), clock.now_utc(), key.clone()).await.unwrap();
        queue.enqueue(t, clock.now_utc(), key).await.unwrap();
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn leased_task_is_invisible_to_other_workers() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");
        queue.enqueue(t, clock.now_utc(), key).await.unwrap();

        let lease = queue.lease(0).await.unwrap().unwrap();
        assert!(queue.lease(1).await.unwrap().is_none());

        queue.ack(lease).await.unwrap();
        assert_eq!(queue.pending_len().await, 0);
        assert_eq!(queue.leased_len().await, 0);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered_with_higher_attempt() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");
        queue.enqueue(t, clock.now_utc(), key).await.unwrap();

        let first = queue.lease(0).await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        // worker crashes: no ack, no fail
        drop(first);

        clock.advance(Duration::from_secs(61));
        let second = queue.lease(1).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn fail_requeues_with_backoff_until_exhausted() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");
        queue.enqueue(t, clock.now_utc(), key).await.unwrap();

        for attempt in 1..=2 {
            let lease = queue.lease(0).await.unwrap().unwrap();
            assert_eq!(lease.attempt, attempt);
            queue.fail(lease, "boom".to_string()).await.unwrap();
            // fixed 10s backoff
            assert!(queue.lease(0).await.unwrap().is_none());
            clock.advance(Duration::from_secs(10));
        }

        let last = queue.lease(0).await.unwrap().unwrap();
        assert_eq!(last.attempt, 3);
        queue.fail(last, "boom".to_string()).await.unwrap();

        // attempts exhausted: discarded, never redelivered
        clock.advance(Duration::from_secs(3600));
        assert!(queue.lease(0).await.unwrap().is_none());
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn cancel_removes_pending_but_not_leased() {
        let clock = TestClock::new();
        let queue = queue(&clock);

        let (t1, key1) = task("a@example.com");
        queue.enqueue(t1, clock.now_utc(), key1.clone()).await.unwrap();
        assert!(queue.cancel(key1.clone()).await.unwrap());
        assert!(!queue.cancel(key1).await.unwrap());

        let (t2, key2) = task("b@example.com");
        queue.enqueue(t2, clock.now_utc(), key2.clone()).await.unwrap();
        let _lease = queue.lease(0).await.unwrap().unwrap();
        assert!(!queue.cancel(key2).await.unwrap());
    }

    #[tokio::test]
    async fn dedupe_key_frees_after_ack() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let (t, key) = task("a@example.com");

        queue.enqueue(t.clone(), clock.now_utc(), key.clone()).await.unwrap();
        let lease = queue.lease(0).await.unwrap().unwrap();
        queue.ack(lease).await.unwrap();

        // same key can be enqueued again once the first task is gone
        queue.enqueue(t, clock.now_utc(), key).await.unwrap();
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn ready_tasks_lease_in_ready_at_order() {
        let clock = TestClock::new();
        let queue = queue(&clock);
        let now = clock.now_utc();

        let (t1, k1) = task("late@example.com");
        let (t2, k2) = task("early@example.com");
        queue.enqueue(t1, now + chrono::Duration::seconds(20), k1).await.unwrap();
        queue.enqueue(t2, now + chrono::Duration::seconds(5), k2).await.unwrap();

        clock.advance(Duration::from_secs(30));
        let first = queue.lease(0).await.unwrap().unwrap();
        assert_eq!(first.task.recipient, "early@example.com");
    }
}
