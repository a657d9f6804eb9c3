use chrono::{Duration, NaiveDate, NaiveTime};
use filtration_engine::curve::{CurveModel, MAX_HOURS, MIN_HOURS};
use filtration_engine::frost::is_frost_active;
use filtration_engine::mode::{resolve, Branch, FrostPolicy, Mode};
use filtration_engine::window::{coalesce, compute_windows};
use proptest::prelude::*;

/// Water temperatures well beyond anything a sensor reports
fn temperature_strategy() -> impl Strategy<Value = f64> {
    -50.0..=60.0
}

fn coefficient_strategy() -> impl Strategy<Value = u8> {
    10u8..=100
}

fn pivot_strategy() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, 0u32..60).prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn mode_strategy() -> impl Strategy<Value = Mode> {
    prop_oneof![
        Just(Mode::Off),
        Just(Mode::Continuous),
        Just(Mode::ShortCycle),
        Just(Mode::Scheduled),
    ]
}

proptest! {
    #[test]
    fn test_duration_always_within_bounds(
        temp in temperature_strategy(),
        coefficient in coefficient_strategy()
    ) {
        for model in [CurveModel::Cubic, CurveModel::Stepwise] {
            let hours = model.duration_hours(Some(temp), coefficient).unwrap();
            prop_assert!((MIN_HOURS..=MAX_HOURS).contains(&hours), "{model:?} gave {hours}");
        }
    }

    #[test]
    fn test_windows_are_ordered_and_sum_to_total(
        pivot in pivot_strategy(),
        pause in 0u32..=1440,
        total in 0.0f64..=24.0,
        date in date_strategy()
    ) {
        let [w1, w2] = compute_windows(pivot, pause, total, date);

        prop_assert!(w1.start <= w1.end);
        prop_assert!(w1.end <= w2.start);
        prop_assert!(w2.start <= w2.end);
        prop_assert_eq!(w2.start - w1.end, Duration::seconds(i64::from(pause) * 60));

        let run = (w1.duration() + w2.duration()).num_milliseconds() as f64 / 3_600_000.0;
        prop_assert!((run - total).abs() < 1e-6 + 2.0 / 3_600_000.0, "run {run} vs total {total}");
    }

    #[test]
    fn test_windows_anchor_on_reference_date(
        pivot in pivot_strategy(),
        pause in 0u32..=1440,
        total in 0.0f64..=24.0,
        date in date_strategy()
    ) {
        let [w1, w2] = compute_windows(pivot, pause, total, date);
        let anchor = date.and_time(pivot);

        // The pivot sits exactly in the middle of the pause
        prop_assert_eq!(anchor - w1.end, w2.start - anchor);
        prop_assert_eq!(compute_windows(pivot, pause, total, date), [w1, w2]);
    }

    #[test]
    fn test_coalesced_segments_cover_same_run_time(
        pivot in pivot_strategy(),
        pause in 0u32..=1440,
        total in 0.0f64..=24.0
    ) {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let windows = compute_windows(pivot, pause, total, date);
        let segments = coalesce(&windows);

        let total_windows = windows[0].duration() + windows[1].duration();
        let total_segments = segments
            .iter()
            .fold(Duration::zero(), |acc, s| acc + s.duration());
        prop_assert_eq!(total_windows, total_segments);
        prop_assert!(segments.windows(2).all(|pair| pair[0].end < pair[1].start));
    }

    #[test]
    fn test_frost_without_reading_is_never_active(threshold in -20.0f64..=20.0) {
        prop_assert!(!is_frost_active(None, threshold));
    }

    #[test]
    fn test_frost_is_strict_comparison(outdoor in -40.0f64..=40.0, threshold in -20.0f64..=20.0) {
        prop_assert_eq!(is_frost_active(Some(outdoor), threshold), outdoor < threshold);
    }

    #[test]
    fn test_frost_wins_under_default_policy(mode in mode_strategy()) {
        prop_assert_eq!(resolve(mode, true, FrostPolicy::OverridesAll), Branch::Frost);
    }
}
