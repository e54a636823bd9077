//! Invariant checkers shared across test suites.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use maildrip_core::{Message, MessageStatus};

/// Truncates an instant to the start of its hour, mirroring the allocator's
/// bucketing.
pub fn hour_bucket(t: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = t.timestamp().rem_euclid(3600);
    t - Duration::seconds(into_hour) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

/// Counts instants per hour-aligned window.
pub fn bucket_counts(times: &[DateTime<Utc>]) -> HashMap<DateTime<Utc>, usize> {
    let mut counts = HashMap::new();
    for t in times {
        *counts.entry(hour_bucket(*t)).or_insert(0) += 1;
    }
    counts
}

/// Asserts that no hour-aligned window holds more than `hourly_limit`
/// instants.
///
/// # Panics
///
/// Panics with the offending bucket when the cap is violated.
pub fn assert_hourly_cap(times: &[DateTime<Utc>], hourly_limit: u32) {
    for (bucket, count) in bucket_counts(times) {
        assert!(
            count <= hourly_limit as usize,
            "hour bucket {bucket} holds {count} messages, cap is {hourly_limit}"
        );
    }
}

/// Asserts the `sent_time`/`error` field invariants for a message's status.
///
/// # Panics
///
/// Panics when a field disagrees with the status.
pub fn assert_field_invariants(message: &Message) {
    match message.status {
        MessageStatus::Sent => {
            assert!(message.sent_time.is_some(), "sent message {} lacks sent_time", message.id);
            assert!(message.error.is_none(), "sent message {} carries an error", message.id);
        },
        MessageStatus::Failed => {
            assert!(message.error.is_some(), "failed message {} lacks an error", message.id);
            assert!(message.sent_time.is_none(), "failed message {} has sent_time", message.id);
        },
        MessageStatus::Scheduled | MessageStatus::Processing | MessageStatus::Cancelled => {
            assert!(
                message.sent_time.is_none(),
                "message {} in {} has sent_time",
                message.id,
                message.status
            );
        },
    }
}
