//! Daily run-window computation around the pivot time

use crate::curve::{MAX_HOURS, MIN_HOURS};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A span of local wall-clock time during which the pump should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ScheduleWindow {
    /// Whether `now` falls inside `[start, end)`
    #[must_use]
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now < self.end
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Compute the two run-windows for one day
///
/// The first window ends half a pause before the pivot and the second
/// starts half a pause after it; each lasts half of `total_hours`. The
/// pivot is anchored on `reference_date`, so windows may spill into the
/// neighbouring days.
#[must_use]
pub fn compute_windows(
    pivot: NaiveTime,
    pause_minutes: u32,
    total_hours: f64,
    reference_date: NaiveDate,
) -> [ScheduleWindow; 2] {
    let total_hours = if total_hours.is_finite() {
        total_hours.clamp(MIN_HOURS, MAX_HOURS)
    } else {
        MIN_HOURS
    };

    // Half of the total, in milliseconds
    let half = Duration::milliseconds((total_hours * 1_800_000.0).round() as i64);
    let half_pause = Duration::seconds(i64::from(pause_minutes) * 30);
    let pivot = reference_date.and_time(pivot);

    let end1 = pivot - half_pause;
    let start2 = pivot + half_pause;

    [
        ScheduleWindow {
            start: end1 - half,
            end: end1,
        },
        ScheduleWindow {
            start: start2,
            end: start2 + half,
        },
    ]
}

/// Merge touching or overlapping windows into actuation segments
///
/// Input must be ordered by start. With a zero pause the two daily windows
/// share an instant, and actuating them separately would race an OFF
/// against an ON at the pivot.
#[must_use]
pub fn coalesce(windows: &[ScheduleWindow]) -> Vec<ScheduleWindow> {
    let mut segments: Vec<ScheduleWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        if let Some(last) = segments.last_mut() {
            if window.start <= last.end {
                last.end = last.end.max(window.end);
                continue;
            }
        }
        segments.push(*window);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        date().and_hms_opt(h, m, 0).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_windows_without_pause() {
        let [w1, w2] = compute_windows(time(14, 0), 0, 6.0, date());
        assert_eq!(w1.start, at(11, 0));
        assert_eq!(w1.end, at(14, 0));
        assert_eq!(w2.start, at(14, 0));
        assert_eq!(w2.end, at(17, 0));
    }

    #[test]
    fn test_windows_with_pause() {
        let [w1, w2] = compute_windows(time(14, 0), 60, 8.0, date());
        assert_eq!(w1.start, at(9, 30));
        assert_eq!(w1.end, at(13, 30));
        assert_eq!(w2.start, at(14, 30));
        assert_eq!(w2.end, at(18, 30));
    }

    #[test]
    fn test_windows_spill_into_neighbouring_days() {
        let [w1, w2] = compute_windows(time(1, 0), 0, 10.0, date());
        assert_eq!(w1.start.date(), date().pred_opt().unwrap());
        assert_eq!(w1.start.time(), time(20, 0));
        assert_eq!(w2.end, at(6, 0));

        let [_, w2] = compute_windows(time(23, 0), 120, 6.0, date());
        assert_eq!(w2.start, date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn test_fractional_hours_keep_millisecond_precision() {
        let [w1, w2] = compute_windows(time(12, 0), 0, 1.0 / 3.0, date());
        assert_eq!(w1.duration(), Duration::milliseconds(600_000));
        assert_eq!(w2.duration(), Duration::milliseconds(600_000));
    }

    #[test]
    fn test_total_hours_are_clamped() {
        let [w1, w2] = compute_windows(time(12, 0), 0, 30.0, date());
        assert_eq!(w1.duration() + w2.duration(), Duration::hours(24));

        let [w1, _] = compute_windows(time(12, 0), 0, f64::NAN, date());
        assert!(w1.is_empty());
    }

    #[test]
    fn test_contains_is_half_open() {
        let window = ScheduleWindow {
            start: at(11, 0),
            end: at(14, 0),
        };
        assert!(window.contains(at(11, 0)));
        assert!(window.contains(at(13, 59)));
        assert!(!window.contains(at(14, 0)));
        assert!(!window.contains(at(10, 59)));
    }

    #[test]
    fn test_coalesce_touching_windows() {
        let windows = compute_windows(time(14, 0), 0, 6.0, date());
        let segments = coalesce(&windows);
        assert_eq!(
            segments,
            vec![ScheduleWindow {
                start: at(11, 0),
                end: at(17, 0),
            }]
        );
    }

    #[test]
    fn test_coalesce_keeps_separated_windows() {
        let windows = compute_windows(time(14, 0), 30, 6.0, date());
        assert_eq!(coalesce(&windows), windows.to_vec());
    }
}
