//! Streak and rolling-window consistency over a [`DayMarks`] map.
//!
//! Everything here is total: sparse or empty maps and oversized windows are
//! fine, and a zero-length window reports 0%.

use crate::domain::calendar::{DayKey, DayMarks};
use serde::Serialize;

/// Consecutive marked days ending at `today`, inclusive. 0 when `today`
/// itself is unmarked.
pub fn streak(marks: &DayMarks, today: DayKey) -> u32 {
    let mut count = 0;
    let mut cursor = Some(today);
    while let Some(day) = cursor {
        if !marks.is_marked(day) {
            break;
        }
        count += 1;
        cursor = day.previous();
    }
    count
}

/// Percentage (0–100, rounded half up) of the `window` days ending at
/// `today` that are marked.
pub fn rolling_completion(marks: &DayMarks, today: DayKey, window: u32) -> u8 {
    if window == 0 {
        return 0;
    }
    let first = today
        .days_back(u64::from(window) - 1)
        .unwrap_or_else(DayKey::earliest);
    let marked = marks.marked_between(first, today) as u64;
    let window = u64::from(window);
    ((200 * marked + window) / (2 * window)).min(100) as u8
}

/// The `count` days ending at `today`, oldest first.
pub fn recent_days(today: DayKey, count: u32) -> Vec<DayKey> {
    let mut days: Vec<DayKey> = (0..u64::from(count))
        .map_while(|offset| today.days_back(offset))
        .collect();
    days.reverse();
    days
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConsistencySummary {
    pub streak: u32,
    pub last_7_percent: u8,
    pub last_30_percent: u8,
    pub today_marked: bool,
}

pub fn consistency_summary(marks: &DayMarks, today: DayKey) -> ConsistencySummary {
    ConsistencySummary {
        streak: streak(marks, today),
        last_7_percent: rolling_completion(marks, today, 7),
        last_30_percent: rolling_completion(marks, today, 30),
        today_marked: marks.is_marked(today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(value: &str) -> DayKey {
        value.parse().expect("valid day key")
    }

    fn marks_from(today: DayKey, pattern: &[bool]) -> DayMarks {
        pattern
            .iter()
            .enumerate()
            .map(|(offset, marked)| {
                (
                    today.days_back(offset as u64).expect("in range"),
                    *marked,
                )
            })
            .collect()
    }

    #[test]
    fn empty_map_has_no_streak() {
        assert_eq!(streak(&DayMarks::new(), day("2026-10-15")), 0);
    }

    #[test]
    fn streak_stops_at_first_gap() {
        let today = day("2026-10-15");
        let marks = marks_from(today, &[true, true, false, true]);
        assert_eq!(streak(&marks, today), 2);
    }

    #[test]
    fn streak_is_zero_when_today_unmarked() {
        let today = day("2026-10-15");
        let marks = marks_from(today, &[false, true, true]);
        assert_eq!(streak(&marks, today), 0);
    }

    #[test]
    fn streak_treats_missing_day_as_gap() {
        let today = day("2026-10-15");
        let mut marks = DayMarks::new();
        marks.set(today, true);
        marks.set(day("2026-10-13"), true);
        assert_eq!(streak(&marks, today), 1);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        let today = day("2026-03-02");
        let marks = marks_from(today, &[true, true, true, true]);
        assert_eq!(streak(&marks, today), 4);
    }

    #[test]
    fn rolling_completion_matches_reference_values() {
        let today = day("2026-10-15");
        assert_eq!(rolling_completion(&marks_from(today, &[true; 7]), today, 7), 100);
        assert_eq!(rolling_completion(&marks_from(today, &[false; 7]), today, 7), 0);
        assert_eq!(
            rolling_completion(
                &marks_from(today, &[true, false, true, false, true, false, false]),
                today,
                7
            ),
            43
        );
    }

    #[test]
    fn rolling_completion_rounds_half_up() {
        let today = day("2026-10-15");
        let marks = marks_from(today, &[true]);
        assert_eq!(rolling_completion(&marks, today, 8), 13);
    }

    #[test]
    fn rolling_completion_ignores_days_outside_window() {
        let today = day("2026-10-15");
        let mut marks = DayMarks::new();
        marks.set(day("2026-10-16"), true);
        marks.set(day("2026-10-08"), true);
        assert_eq!(rolling_completion(&marks, today, 7), 0);
    }

    #[test]
    fn rolling_completion_handles_degenerate_windows() {
        let today = day("2026-10-15");
        assert_eq!(rolling_completion(&DayMarks::new(), today, 0), 0);
        assert_eq!(rolling_completion(&DayMarks::new(), today, 10_000), 0);
        assert_eq!(rolling_completion(&marks_from(today, &[true]), today, u32::MAX), 0);
    }

    #[test]
    fn recent_days_are_oldest_first() {
        let days = recent_days(day("2026-10-15"), 3);
        assert_eq!(days, vec![day("2026-10-13"), day("2026-10-14"), day("2026-10-15")]);
        assert!(recent_days(day("2026-10-15"), 0).is_empty());
    }

    #[test]
    fn summary_combines_windows() {
        let today = day("2026-10-15");
        let summary = consistency_summary(&marks_from(today, &[true, true, true]), today);
        assert_eq!(
            summary,
            ConsistencySummary {
                streak: 3,
                last_7_percent: 43,
                last_30_percent: 10,
                today_marked: true,
            }
        );
    }

    proptest! {
        #[test]
        fn streak_never_exceeds_marked_days(pattern in prop::collection::vec(any::<bool>(), 0..60)) {
            let today = day("2026-10-15");
            let marks = marks_from(today, &pattern);
            let marked = pattern.iter().filter(|value| **value).count() as u32;
            prop_assert!(streak(&marks, today) <= marked);
        }

        #[test]
        fn rolling_completion_stays_in_percent_range(
            pattern in prop::collection::vec(any::<bool>(), 0..60),
            window in 1u32..90u32
        ) {
            let today = day("2026-10-15");
            let marks = marks_from(today, &pattern);
            let percent = rolling_completion(&marks, today, window);
            prop_assert!(percent <= 100);
            let in_window = pattern.iter().take(window as usize).filter(|value| **value).count();
            if in_window == window as usize {
                prop_assert_eq!(percent, 100);
            }
            if in_window == 0 {
                prop_assert_eq!(percent, 0);
            }
        }
    }
}
