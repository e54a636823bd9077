//! Property tests for the time-bucket allocator.

use chrono::{DateTime, TimeZone, Utc};
use maildrip_core::allocate;
use maildrip_testing::invariants::{bucket_counts, hour_bucket};
use proptest::prelude::*;

fn arb_start() -> impl Strategy<Value = DateTime<Utc>> {
    // a year's worth of seconds around a fixed base keeps shrinking readable
    (0i64..31_536_000).prop_map(|offset| {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocation_is_deterministic(
        start in arb_start(),
        delay in 0u32..600,
        limit in 1u32..200,
        n in 0usize..400,
    ) {
        let first = allocate(start, delay, limit, n);
        let second = allocate(start, delay, limit, n);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_recipient_gets_exactly_one_instant(
        start in arb_start(),
        delay in 0u32..600,
        limit in 1u32..200,
        n in 0usize..400,
    ) {
        let times = allocate(start, delay, limit, n);
        prop_assert_eq!(times.len(), n);
    }

    #[test]
    fn no_hour_window_ever_exceeds_the_cap(
        start in arb_start(),
        delay in 0u32..600,
        limit in 1u32..100,
        n in 0usize..400,
    ) {
        let times = allocate(start, delay, limit, n);
        for (bucket, count) in bucket_counts(&times) {
            prop_assert!(
                count <= limit as usize,
                "bucket {} holds {} with cap {}", bucket, count, limit
            );
        }
    }

    #[test]
    fn assigned_times_never_precede_their_ideal_time(
        start in arb_start(),
        delay in 0u32..600,
        limit in 1u32..100,
        n in 0usize..300,
    ) {
        let times = allocate(start, delay, limit, n);
        for (i, t) in times.iter().enumerate() {
            let ideal = start + chrono::Duration::seconds(i as i64 * i64::from(delay));
            prop_assert!(*t >= ideal, "index {} assigned {} before ideal {}", i, t, ideal);
        }
    }

    #[test]
    fn unsaturated_allocation_keeps_ideal_times_and_order(
        start in arb_start(),
        delay in 1u32..600,
        n in 0usize..200,
    ) {
        // cap big enough that no bucket ever saturates
        let times = allocate(start, delay, 10_000, n);
        for (i, t) in times.iter().enumerate() {
            let ideal = start + chrono::Duration::seconds(i as i64 * i64::from(delay));
            prop_assert_eq!(*t, ideal);
        }
        for pair in times.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn spilled_instants_land_at_hour_starts_plus_index_offset(
        start in arb_start(),
        limit in 1u32..20,
        n in 1usize..200,
    ) {
        // delay 0 forces spillover past the first `limit` messages
        let times = allocate(start, 0, limit, n);
        for (i, t) in times.iter().enumerate().skip(limit as usize) {
            let seconds_into_hour = (*t - hour_bucket(*t)).num_seconds();
            prop_assert_eq!(
                seconds_into_hour as usize,
                i % 60,
                "spilled index {} has offset {}", i, seconds_into_hour
            );
        }
    }
}
