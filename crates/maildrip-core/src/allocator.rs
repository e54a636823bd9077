//! Time-bucket dispatch allocator.
//!
//! Distributes a batch over time so that consecutive messages are spaced by
//! the pacing delay and no hour-aligned window receives more messages than
//! the hourly cap. Pure and call-local: the bucket counts live only for the
//! duration of one call, so concurrently submitted batches are not jointly
//! capped. That advisory scope is intentional; the process-wide send rate is
//! enforced later, at delivery time.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Computes the dispatch instant for each of `recipients` messages.
///
/// For index `i` the ideal instant is `start + i * delay_seconds`. If the
/// ideal instant lands in an hour bucket that already holds `hourly_limit`
/// assignments, the instant spills to the start of the next hour plus
/// `i % 60` seconds, retrying until an undersaturated bucket is found. The
/// seconds offset spreads spilled messages away from the exact hour boundary
/// and is deterministic, so identical inputs always produce identical
/// output.
///
/// The returned instants preserve the ideal ordering except inside a spilled
/// hour, where the `i % 60` spread can locally reorder items whose index
/// wraps past 60.
pub fn allocate(
    start: DateTime<Utc>,
    delay_seconds: u32,
    hourly_limit: u32,
    recipients: usize,
) -> Vec<DateTime<Utc>> {
    let mut buckets: HashMap<i64, u32> = HashMap::new();
    let mut times = Vec::with_capacity(recipients);

    for i in 0..recipients {
        let mut t = start + Duration::seconds(i as i64 * i64::from(delay_seconds));

        loop {
            let bucket = floor_to_hour(t);
            let count = buckets.entry(bucket.timestamp()).or_insert(0);
            if *count < hourly_limit {
                *count += 1;
                times.push(t);
                break;
            }
            // bucket saturated: spill past the hour boundary. Each retry
            // strictly advances one hour, so the loop terminates.
            t = bucket + Duration::hours(1) + Duration::seconds((i % 60) as i64);
        }
    }

    times
}

/// Truncates an instant to the start of its hour.
fn floor_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = t.timestamp().rem_euclid(3600);
    t - Duration::seconds(into_hour) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn hour_aligned_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn paced_batch_keeps_ideal_times() {
        let start = hour_aligned_start();
        let times = allocate(start, 5, 100, 3);
        assert_eq!(times, vec![
            start,
            start + Duration::seconds(5),
            start + Duration::seconds(10),
        ]);
    }

    #[test]
    fn saturated_hour_spills_with_seconds_offset() {
        let start = hour_aligned_start();
        let times = allocate(start, 0, 100, 150);

        // first hundred stay in the start hour
        for t in &times[..100] {
            assert_eq!(floor_to_hour(*t), start);
        }
        // the rest land in the next hour, offset by i mod 60 seconds
        for (i, t) in times.iter().enumerate().skip(100) {
            let expected = start + Duration::hours(1) + Duration::seconds((i % 60) as i64);
            assert_eq!(*t, expected, "index {i}");
        }
    }

    #[test]
    fn no_hour_window_exceeds_the_cap() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 23, 45).unwrap();
        let times = allocate(start, 30, 7, 120);

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for t in &times {
            *counts.entry(floor_to_hour(*t).timestamp()).or_insert(0) += 1;
        }
        assert!(counts.values().all(|&c| c <= 7));
        assert_eq!(counts.values().sum::<usize>(), 120);
    }

    #[test]
    fn identical_inputs_yield_identical_output() {
        let start = hour_aligned_start();
        let a = allocate(start, 3, 11, 200);
        let b = allocate(start, 3, 11, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn limit_above_count_preserves_every_ideal_time() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 59, 0).unwrap();
        let times = allocate(start, 45, 1000, 40);
        for (i, t) in times.iter().enumerate() {
            assert_eq!(*t, start + Duration::seconds(45 * i as i64));
        }
    }

    #[test]
    fn zero_recipients_allocates_nothing() {
        assert!(allocate(hour_aligned_start(), 2, 100, 0).is_empty());
    }

    #[test]
    fn zero_delay_stacks_until_the_cap() {
        let start = hour_aligned_start();
        let times = allocate(start, 0, 3, 5);
        assert_eq!(&times[..3], &[start, start, start]);
        assert_eq!(times[3], start + Duration::hours(1) + Duration::seconds(3));
        assert_eq!(times[4], start + Duration::hours(1) + Duration::seconds(4));
    }

    #[test]
    fn unaligned_start_buckets_by_wall_clock_hour() {
        // 10:58 start, one per bucket: second message at 10:59 still shares
        // the 10:00 bucket and must spill to 11:00:01
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 58, 0).unwrap();
        let times = allocate(start, 60, 1, 2);
        assert_eq!(times[0], start);
        assert_eq!(
            times[1],
            Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 1).unwrap()
        );
    }

    #[test]
    fn no_spill_output_is_monotonic() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 13).unwrap();
        let times = allocate(start, 4, 10_000, 500);
        for pair in times.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
