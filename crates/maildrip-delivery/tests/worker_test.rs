//! Integration tests for the delivery pipeline.
//!
//! Exercises worker behavior through the engine against the in-memory
//! environment: status transitions, cancellation precedence, idempotent
//! redelivery, failure isolation, and the process-wide throttle.

use std::time::Duration;

use anyhow::Result;
use maildrip_core::{BatchRequest, Clock, MessageStatus, MessageStore};
use maildrip_delivery::TransportError;
use maildrip_queue::{Backoff, DelayQueue, RetryPolicy};
use maildrip_testing::{BatchBuilder, TestEnv};

fn immediate_batch(env: &TestEnv, recipients: &[&str]) -> BatchRequest {
    BatchBuilder::new()
        .recipients(recipients)
        .starting_at(env.clock.now_utc())
        .delay_seconds(0)
        .build()
}

#[tokio::test]
async fn ready_message_is_sent_and_marked() -> Result<()> {
    let env = TestEnv::new();
    let batch = BatchBuilder::new()
        .recipients(&["a@example.com"])
        .starting_at(env.clock.now_utc())
        .delay_seconds(0)
        .build();

    let receipt = env.submit("alice", batch).await?;
    assert_eq!(receipt.scheduled_count, 1);

    let processed = env.drain().await?;
    assert_eq!(processed, 1);

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert!(messages[0].sent_time.is_some());
    assert_eq!(env.transport.sent_count().await, 1);

    let stats = env.engine_stats().await;
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 0);
    Ok(())
}

#[tokio::test]
async fn future_message_waits_for_its_dispatch_time() -> Result<()> {
    let env = TestEnv::new();
    let batch = BatchBuilder::new()
        .recipients(&["a@example.com"])
        .starting_at(env.clock.now_utc() + chrono::Duration::seconds(120))
        .build();
    env.submit("alice", batch).await?;

    assert_eq!(env.drain().await?, 0);
    assert_eq!(env.transport.sent_count().await, 0);

    assert_eq!(env.advance_and_drain(Duration::from_secs(120)).await?, 1);
    assert_eq!(env.transport.sent_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn transport_failure_marks_failed_and_isolates_batch_mates() -> Result<()> {
    let env = TestEnv::builder().retry_policy(RetryPolicy::no_retries()).build();
    env.transport
        .fail_recipient(
            "broken@example.com",
            TransportError::Api { status: 500, body: "provider exploded".to_string() },
        )
        .await;

    let batch = BatchBuilder::new()
        .recipients(&["ok1@example.com", "broken@example.com", "ok2@example.com"])
        .starting_at(env.clock.now_utc())
        .delay_seconds(0)
        .build();
    env.submit("alice", batch).await?;
    env.drain().await?;

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    let broken = messages.iter().find(|m| m.recipient == "broken@example.com").unwrap();
    assert_eq!(broken.status, MessageStatus::Failed);
    assert!(broken.error.as_deref().unwrap().contains("500"));
    assert!(broken.sent_time.is_none());

    for message in messages.iter().filter(|m| m.recipient != "broken@example.com") {
        assert_eq!(message.status, MessageStatus::Sent, "{} affected", message.recipient);
    }
    Ok(())
}

#[tokio::test]
async fn failed_message_retries_until_policy_exhausts() -> Result<()> {
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(3600),
        jitter_factor: 0.0,
        backoff: Backoff::Fixed,
    };
    let env = TestEnv::builder().retry_policy(policy).build();
    env.transport
        .fail_recipient("down@example.com", TransportError::Timeout { seconds: 30 })
        .await;

    env.submit("alice", immediate_batch(&env, &["down@example.com"])).await?;

    // three attempts, 60s fixed backoff apart
    assert_eq!(env.drain().await?, 1);
    assert_eq!(env.advance_and_drain(Duration::from_secs(60)).await?, 1);
    assert_eq!(env.advance_and_drain(Duration::from_secs(60)).await?, 1);

    // exhausted: nothing left however far time advances
    assert_eq!(env.advance_and_drain(Duration::from_secs(7200)).await?, 0);
    assert_eq!(env.queue.pending_len().await, 0);

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    assert_eq!(messages[0].status, MessageStatus::Failed);
    assert_eq!(env.engine_stats().await.failed, 3);
    Ok(())
}

#[tokio::test]
async fn retry_succeeds_once_transport_recovers() -> Result<()> {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(3600),
        jitter_factor: 0.0,
        backoff: Backoff::Exponential,
    };
    let env = TestEnv::builder().retry_policy(policy).build();
    env.transport
        .fail_times("flaky@example.com", 2, TransportError::Api {
            status: 503,
            body: "try later".to_string(),
        })
        .await;

    env.submit("alice", immediate_batch(&env, &["flaky@example.com"])).await?;

    env.drain().await?; // attempt 1 fails
    env.advance_and_drain(Duration::from_secs(30)).await?; // attempt 2 fails
    env.advance_and_drain(Duration::from_secs(60)).await?; // attempt 3 succeeds

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(env.transport.sent_to("flaky@example.com").await, 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_message_is_skipped_without_sending() -> Result<()> {
    let env = TestEnv::new();
    env.submit("alice", immediate_batch(&env, &["late@example.com"])).await?;

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    let id = messages[0].id;

    // cancel through the store only; the queue task is still there, so the
    // worker's status re-check is what must stop the send
    env.store.cancel(id, "alice".into()).await?;

    env.drain().await?;
    env.assert_status(id, MessageStatus::Cancelled).await;
    assert_eq!(env.transport.sent_count().await, 0);
    assert_eq!(env.engine_stats().await.skipped_cancelled, 1);
    Ok(())
}

#[tokio::test]
async fn redelivered_task_never_sends_twice() -> Result<()> {
    let env = TestEnv::builder().lease_duration(Duration::from_secs(60)).build();
    env.submit("alice", immediate_batch(&env, &["once@example.com"])).await?;
    env.drain().await?;
    assert_eq!(env.transport.sent_count().await, 1);

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    let id = messages[0].id;

    // simulate a crash-after-send redelivery: enqueue the same task again
    // (the dedupe key is free after the ack)
    env.queue
        .enqueue(
            maildrip_queue::DeliveryTask {
                message_id: id,
                recipient: "once@example.com".to_string(),
            },
            env.clock.now_utc(),
            format!("msg-{id}"),
        )
        .await?;

    let processed = env.drain().await?;
    assert_eq!(processed, 1, "redelivered task is processed");
    // but the status re-check suppressed the duplicate send
    assert_eq!(env.transport.sent_count().await, 1);
    env.assert_status(id, MessageStatus::Sent).await;
    Ok(())
}

#[tokio::test]
async fn hourly_limiter_blocks_after_capacity_until_refill() -> Result<()> {
    let env = TestEnv::builder().max_sends_per_hour(2).build();
    env.submit(
        "alice",
        immediate_batch(&env, &["a@example.com", "b@example.com", "c@example.com"]),
    )
    .await?;

    // draining processes all three tasks, but the third send must wait for
    // a refilled token; the test clock advances inside the limiter's sleep
    let before = env.clock.now_utc();
    env.drain().await?;
    let elapsed = env.clock.now_utc() - before;

    assert_eq!(env.transport.sent_count().await, 3);
    // 2/hour refill rate means the third token took ~30 virtual minutes
    assert!(elapsed >= chrono::Duration::minutes(29), "only waited {elapsed}");

    Ok(())
}

#[tokio::test]
async fn engine_start_and_graceful_shutdown() -> Result<()> {
    use std::sync::Arc;

    use maildrip_core::{MemoryMessageStore, SystemClock};
    use maildrip_delivery::{transport::mock::MockTransport, DeliveryConfig, DeliveryEngine};
    use maildrip_queue::MemoryDelayQueue;

    let clock: Arc<dyn maildrip_core::Clock> = Arc::new(SystemClock::new());
    let store = Arc::new(MemoryMessageStore::new());
    let queue = Arc::new(MemoryDelayQueue::with_defaults(clock.clone()));
    let transport = Arc::new(MockTransport::new());

    let config = DeliveryConfig {
        worker_count: 3,
        poll_interval: Duration::from_millis(20),
        ..DeliveryConfig::default()
    };
    let mut engine = DeliveryEngine::new(store, queue, transport, config, clock);

    engine.start().await;
    assert_eq!(engine.stats().await.active_workers, 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown().await?;
    Ok(())
}
