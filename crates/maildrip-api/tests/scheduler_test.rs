//! Integration tests for the batch scheduler service.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use maildrip_api::ApiError;
use maildrip_core::{Clock, MessageStatus, MessageStore};
use maildrip_queue::DelayQueue;
use maildrip_testing::{invariants, BatchBuilder, TestEnv};

#[tokio::test]
async fn submission_persists_and_enqueues_every_recipient() -> Result<()> {
    let env = TestEnv::new();
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    let batch = BatchBuilder::new()
        .generated_recipients(25)
        .starting_at(start)
        .delay_seconds(10)
        .hourly_limit(100)
        .build();

    let receipt = env.submit("alice", batch).await?;
    assert_eq!(receipt.scheduled_count, 25);
    assert_eq!(env.store.len().await, 25);
    assert_eq!(env.queue.pending_len().await, 25);

    let messages = env.store.list_by_owner("alice".into(), None).await?;
    for message in &messages {
        assert_eq!(message.status, MessageStatus::Scheduled);
        assert_eq!(message.batch_start, start);
        assert_eq!(message.batch_delay_seconds, 10);
        assert_eq!(message.batch_hourly_limit, 100);
        invariants::assert_field_invariants(message);
    }

    // dispatch times honor the batch cap
    let times: Vec<_> = messages.iter().map(|m| m.scheduled_time).collect();
    invariants::assert_hourly_cap(&times, 100);
    Ok(())
}

#[tokio::test]
async fn invalid_batch_rejects_before_persisting_anything() -> Result<()> {
    let env = TestEnv::new();

    let no_subject = BatchBuilder::new().subject("").build();
    let err = env.scheduler.submit("alice".into(), no_subject).await.unwrap_err();
    match err {
        ApiError::Validation(v) => assert_eq!(v.field, "subject"),
        other => panic!("expected validation error, got {other:?}"),
    }

    let bad_recipient = BatchBuilder::new().recipients(&["not-an-email"]).build();
    let err = env.scheduler.submit("alice".into(), bad_recipient).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(v) if v.field == "recipients"));

    // nothing was stored or enqueued
    assert!(env.store.is_empty().await);
    assert_eq!(env.queue.pending_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_submission_of_a_message_is_idempotent_in_the_queue() -> Result<()> {
    let env = TestEnv::new();
    env.submit("alice", BatchBuilder::new().build()).await?;
    let messages = env.store.list_by_owner("alice".into(), None).await?;
    let message = &messages[0];

    // a second enqueue under the same dedupe key must not add a task
    env.queue
        .enqueue(
            maildrip_queue::DeliveryTask {
                message_id: message.id,
                recipient: message.recipient.clone(),
            },
            message.scheduled_time,
            message.dedupe_key(),
        )
        .await?;
    assert_eq!(env.queue.pending_len().await, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_flow_removes_pending_task_and_flips_status() -> Result<()> {
    let env = TestEnv::new();
    let start = env.scheduler.clock().now_utc() + Duration::hours(1);
    env.submit("alice", BatchBuilder::new().starting_at(start).build()).await?;

    let id = env.store.list_by_owner("alice".into(), None).await?[0].id;

    env.scheduler.cancel("alice".into(), id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    env.assert_status(id, MessageStatus::Cancelled).await;
    assert_eq!(env.queue.pending_len().await, 0);

    // cancelling again conflicts
    let err = env.scheduler.cancel("alice".into(), id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn cancel_and_read_are_ownership_scoped() -> Result<()> {
    let env = TestEnv::new();
    env.submit("alice", BatchBuilder::new().build()).await?;
    let id = env.store.list_by_owner("alice".into(), None).await?[0].id;

    assert!(matches!(
        env.scheduler.get("mallory".into(), id).await.unwrap_err(),
        ApiError::NotFound
    ));
    assert!(matches!(
        env.scheduler.cancel("mallory".into(), id).await.unwrap_err(),
        ApiError::NotFound
    ));
    assert!(matches!(
        env.scheduler.delete("mallory".into(), id).await.unwrap_err(),
        ApiError::NotFound
    ));

    // the rightful owner still sees it, untouched
    let message = env.scheduler.get("alice".into(), id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(message.status, MessageStatus::Scheduled);
    Ok(())
}

#[tokio::test]
async fn delete_removes_message_and_its_pending_task() -> Result<()> {
    let env = TestEnv::new();
    let start = env.scheduler.clock().now_utc() + Duration::hours(1);
    env.submit("alice", BatchBuilder::new().starting_at(start).build()).await?;
    let id = env.store.list_by_owner("alice".into(), None).await?[0].id;

    env.scheduler.delete("alice".into(), id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(env.store.is_empty().await);
    assert_eq!(env.queue.pending_len().await, 0);

    // the task is gone: nothing to deliver later
    env.advance(std::time::Duration::from_secs(7200));
    assert_eq!(env.drain().await?, 0);
    Ok(())
}

#[tokio::test]
async fn stats_reflect_lifecycle() -> Result<()> {
    let env = TestEnv::new();
    let now = env.scheduler.clock().now_utc();
    env.submit(
        "alice",
        BatchBuilder::new()
            .recipients(&["a@example.com", "b@example.com"])
            .starting_at(now)
            .delay_seconds(0)
            .build(),
    )
    .await?;

    let stats = env.stats("alice").await?;
    assert_eq!(stats.scheduled, 2);
    assert_eq!(stats.sent, 0);

    env.drain().await?;

    let stats = env.stats("alice").await?;
    assert_eq!(stats.scheduled, 0);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 0);
    Ok(())
}
