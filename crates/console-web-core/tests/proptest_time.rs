//! Property-based tests for server-relative time values.

use proptest::prelude::*;

use console_web_core::time::{Duration, NANOS_PER_SEC, ServerClock, Timestamp};

// =============================================================================
// Strategies
// =============================================================================

fn arb_seconds() -> impl Strategy<Value = i64> {
    -1_000_000_000i64..1_000_000_000i64
}

/// Sub-second component, deliberately allowed far outside `[0, 1e9)`.
fn arb_raw_nanos() -> impl Strategy<Value = i64> {
    -10 * NANOS_PER_SEC..10 * NANOS_PER_SEC
}

fn arb_duration() -> impl Strategy<Value = Duration> {
    (arb_seconds(), arb_raw_nanos()).prop_map(|(s, n)| Duration::new(s, n))
}

fn total_nanos(seconds: i64, nanos: i64) -> i128 {
    i128::from(seconds) * i128::from(NANOS_PER_SEC) + i128::from(nanos)
}

fn duration_nanos(d: Duration) -> i128 {
    total_nanos(d.seconds(), i64::from(d.subsec_nanos()))
}

// =============================================================================
// Normalization
// =============================================================================

proptest! {
    #[test]
    fn construction_normalizes_and_preserves_magnitude(s in arb_seconds(), n in arb_raw_nanos()) {
        let d = Duration::new(s, n);
        prop_assert!(i64::from(d.subsec_nanos()) < NANOS_PER_SEC);
        prop_assert_eq!(duration_nanos(d), total_nanos(s, n));

        let t = Timestamp::new(s, n);
        prop_assert!(i64::from(t.subsec_nanos()) < NANOS_PER_SEC);
        prop_assert_eq!(total_nanos(t.seconds(), i64::from(t.subsec_nanos())), total_nanos(s, n));
    }

    #[test]
    fn subtracting_self_is_zero(d in arb_duration()) {
        prop_assert!((d - d).is_zero());
    }

    #[test]
    fn add_then_subtract_round_trips(a in arb_duration(), b in arb_duration()) {
        prop_assert_eq!((a + b) - b, a);
    }

    #[test]
    fn arithmetic_matches_nanosecond_math(a in arb_duration(), b in arb_duration()) {
        prop_assert_eq!(duration_nanos(a + b), duration_nanos(a) + duration_nanos(b));
        prop_assert_eq!(duration_nanos(a - b), duration_nanos(a) - duration_nanos(b));
    }

    #[test]
    fn ordering_matches_nanosecond_order(a in arb_duration(), b in arb_duration()) {
        prop_assert_eq!(a.cmp(&b), duration_nanos(a).cmp(&duration_nanos(b)));
    }

    #[test]
    fn saturating_sub_is_never_negative(a in arb_duration(), b in arb_duration()) {
        prop_assert!(!a.saturating_sub(b).is_negative());
    }

    #[test]
    fn timestamp_offsets_are_consistent(s in arb_seconds(), n in arb_raw_nanos(), d in arb_duration()) {
        let t = Timestamp::new(s, n);
        prop_assert_eq!((t + d) - t, d);
        prop_assert_eq!((t - d) + d, t);
    }
}

// =============================================================================
// Display
// =============================================================================

proptest! {
    #[test]
    fn display_is_never_empty(d in arb_duration()) {
        let text = d.to_string();
        prop_assert!(!text.is_empty());
        prop_assert_eq!(text.starts_with('-'), d.is_negative());
    }

    #[test]
    fn long_durations_show_at_most_two_units(secs in 60i64..10_000_000, nanos in 0i64..NANOS_PER_SEC) {
        let text = Duration::new(secs, nanos).to_string();
        prop_assert!(text.ends_with(' '));
        let units = text.split_whitespace().count();
        prop_assert!((1..=2).contains(&units), "{}", text);
    }
}

// =============================================================================
// Server clock
// =============================================================================

proptest! {
    #[test]
    fn clock_reports_running_maximum(points in prop::collection::vec((arb_seconds(), 0i64..NANOS_PER_SEC), 1..30)) {
        let mut clock = ServerClock::new();
        let mut max: Option<Timestamp> = None;
        for (s, n) in points {
            let t = Timestamp::new(s, n);
            let moved = clock.observe(t);
            prop_assert_eq!(moved, max.is_none_or(|m| t > m));
            max = Some(max.map_or(t, |m| m.max(t)));
            prop_assert_eq!(clock.now(), max);
        }
    }
}
