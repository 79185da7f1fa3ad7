//! Occurrence expansion and overlap detection for schedule windows.
//!
//! Everything here is pure: windows come in fully loaded (exceptions
//! included) and occurrences come out. All ranges are half-open, so a
//! window ending at 17:00 never collides with one starting at 17:00.
//!
//! Occurrence `k` of a recurring window starts `k` periods after the base
//! start. Monthly shifts are computed from the base every time and clamp to
//! the last day of shorter months (Jan 31 -> Feb 29 -> Mar 31), and every
//! occurrence keeps the base duration.

use chrono::{Datelike, Duration, Months, NaiveDateTime};

use crate::models::{Occurrence, Recurrence, ScheduleWindow};

/// Lazily yields the occurrences of one window that intersect a query range.
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    window: &'a ScheduleWindow,
    from: NaiveDateTime,
    to: NaiveDateTime,
    next_index: Option<u32>,
    skip_exceptions: bool,
}

impl<'a> Occurrences<'a> {
    fn new(
        window: &'a ScheduleWindow,
        from: NaiveDateTime,
        to: NaiveDateTime,
        skip_exceptions: bool,
    ) -> Self {
        let next_index = (from < to).then(|| first_candidate_index(window, from));
        Occurrences {
            window,
            from,
            to,
            next_index,
            skip_exceptions,
        }
    }
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        let window = self.window;
        let duration = window.duration();

        loop {
            let index = self.next_index?;
            let start = match nth_start(window, index) {
                Some(start) if start < self.to && within_series(window, start) => start,
                _ => {
                    self.next_index = None;
                    return None;
                }
            };

            self.next_index = if window.recurrence.is_recurring() {
                index.checked_add(1)
            } else {
                None
            };

            let end = start + duration;
            if end <= self.from {
                continue;
            }
            if self.skip_exceptions && window.exceptions.contains(&start) {
                continue;
            }

            return Some(Occurrence {
                window_id: window.id,
                start,
                end,
                playlist_id: window.playlist_id,
                priority: window.priority,
                recurring: window.recurrence.is_recurring(),
            });
        }
    }
}

/// Occurrences of `window` intersecting `[from, to)`, exceptions removed.
///
/// Cost is proportional to the number of occurrences in range: the first
/// candidate is located arithmetically rather than by walking the series.
pub fn expand(window: &ScheduleWindow, from: NaiveDateTime, to: NaiveDateTime) -> Occurrences<'_> {
    Occurrences::new(window, from, to, true)
}

/// Whether `at` is the start of one of the window's occurrences, suppressed or not.
pub fn is_occurrence_start(window: &ScheduleWindow, at: NaiveDateTime) -> bool {
    let probe_end = at + Duration::seconds(1);
    Occurrences::new(window, at, probe_end, false).any(|occurrence| occurrence.start == at)
}

/// Start of occurrence `index`, ignoring `recur_until`.
fn nth_start(window: &ScheduleWindow, index: u32) -> Option<NaiveDateTime> {
    match window.recurrence {
        Recurrence::None => (index == 0).then_some(window.start),
        Recurrence::Daily => window
            .start
            .checked_add_signed(Duration::days(i64::from(index))),
        Recurrence::Weekly => window
            .start
            .checked_add_signed(Duration::weeks(i64::from(index))),
        Recurrence::Monthly => window.start.checked_add_months(Months::new(index)),
    }
}

fn within_series(window: &ScheduleWindow, start: NaiveDateTime) -> bool {
    match (window.recurrence, window.recur_until) {
        (Recurrence::None, _) => true,
        (_, Some(until)) => start <= until,
        (_, None) => true,
    }
}

/// An index no greater than the first occurrence that can end after `from`.
/// The iterator discards the few candidates that still end too early.
fn first_candidate_index(window: &ScheduleWindow, from: NaiveDateTime) -> u32 {
    let base_end = window.end;
    if from <= base_end {
        return 0;
    }

    let index = match window.recurrence {
        Recurrence::None => 0,
        Recurrence::Daily | Recurrence::Weekly => {
            let period = window
                .recurrence
                .fixed_period()
                .map(|p| p.num_seconds())
                .unwrap_or(1);
            (from - base_end).num_seconds() / period
        }
        Recurrence::Monthly => {
            let months = (i64::from(from.year()) - i64::from(window.start.year())) * 12
                + i64::from(from.month0())
                - i64::from(window.start.month0());
            // A monthly occurrence lasts at most 28 days, so anything starting
            // two calendar months before `from` has already ended.
            months - 2
        }
    };

    u32::try_from(index.max(0)).unwrap_or(u32::MAX)
}

/// First and last instant any occurrence of the window can cover.
fn lifetime(window: &ScheduleWindow) -> (NaiveDateTime, NaiveDateTime) {
    let last_end = match (window.recurrence, window.recur_until) {
        (Recurrence::None, _) => window.end,
        (_, Some(until)) => until
            .checked_add_signed(window.duration())
            .unwrap_or(NaiveDateTime::MAX),
        (_, None) => NaiveDateTime::MAX,
    };
    (window.start, last_end)
}

/// Fewer occurrences per unit of time ranks higher; the higher-ranked
/// series drives the sweep.
fn sweep_rank(recurrence: Recurrence) -> u8 {
    match recurrence {
        Recurrence::None => 3,
        Recurrence::Monthly => 2,
        Recurrence::Weekly => 1,
        Recurrence::Daily => 0,
    }
}

/// Exact length in nanoseconds. Unlike `num_nanoseconds`, never overflows
/// for spans of centuries.
fn total_nanos(span: Duration) -> i128 {
    let seconds = span.num_seconds();
    let subsec = (span - Duration::seconds(seconds))
        .num_nanoseconds()
        .unwrap_or(0);
    i128::from(seconds) * 1_000_000_000 + i128::from(subsec)
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

/// Proves two fixed-period series can never meet, regardless of bounds.
///
/// Relative to any occurrence of `a`, the starts of `b` sit at
/// `r + m * g` where `g` is the gcd of both periods and `r` the phase
/// offset modulo `g`. They meet iff some such point lies in `(-d_b, d_a)`.
fn phases_disjoint(a: &ScheduleWindow, b: &ScheduleWindow) -> bool {
    let (Some(period_a), Some(period_b)) =
        (a.recurrence.fixed_period(), b.recurrence.fixed_period())
    else {
        return false;
    };

    let g = gcd(total_nanos(period_a), total_nanos(period_b));
    let d_a = total_nanos(a.duration());
    let d_b = total_nanos(b.duration());
    if g == 0 || d_a + d_b > g {
        return false;
    }

    let r = total_nanos(b.start - a.start).rem_euclid(g);
    r >= d_a && g - r >= d_b
}

/// Whether any instant is covered by an occurrence of both windows.
pub fn windows_overlap(a: &ScheduleWindow, b: &ScheduleWindow) -> bool {
    let (a_first, a_last) = lifetime(a);
    let (b_first, b_last) = lifetime(b);
    let horizon_start = a_first.max(b_first);
    let horizon_end = a_last.min(b_last);
    if horizon_start >= horizon_end {
        return false;
    }

    if phases_disjoint(a, b) {
        return false;
    }

    let (driver, other) = if sweep_rank(a.recurrence) >= sweep_rank(b.recurrence) {
        (a, b)
    } else {
        (b, a)
    };

    expand(driver, horizon_start, horizon_end)
        .any(|occurrence| expand(other, occurrence.start, occurrence.end).next().is_some())
}

/// The first enabled window in `existing` that overlaps `candidate`.
///
/// Disabled windows never constrain, and a disabled candidate constrains
/// nothing. The candidate itself is skipped by id, so a stored window can
/// be checked against its own schedule.
pub fn find_overlap<'a, I>(candidate: &ScheduleWindow, existing: I) -> Option<i32>
where
    I: IntoIterator<Item = &'a ScheduleWindow>,
{
    if !candidate.enabled {
        return None;
    }

    existing
        .into_iter()
        .filter(|window| window.enabled && window.id != candidate.id)
        .find(|window| windows_overlap(candidate, window))
        .map(|window| window.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn window(
        id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
        recurrence: Recurrence,
        recur_until: Option<NaiveDateTime>,
    ) -> ScheduleWindow {
        ScheduleWindow {
            id,
            schedule_id: 1,
            playlist_id: 100 + id,
            start,
            end,
            recurrence,
            recur_until,
            priority: 0,
            enabled: true,
            exceptions: BTreeSet::new(),
            created_at: start,
        }
    }

    fn starts(occurrences: Occurrences<'_>) -> Vec<NaiveDateTime> {
        occurrences.map(|o| o.start).collect()
    }

    #[test]
    fn test_single_window_inside_and_outside_query() {
        let w = window(1, at(2024, 3, 4, 9, 0), at(2024, 3, 4, 17, 0), Recurrence::None, None);

        let hit: Vec<_> = expand(&w, at(2024, 3, 4, 16, 0), at(2024, 3, 5, 0, 0)).collect();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].start, w.start);
        assert_eq!(hit[0].end, w.end);
        assert!(!hit[0].recurring);

        assert_eq!(expand(&w, at(2024, 3, 4, 17, 0), at(2024, 3, 5, 0, 0)).count(), 0);
        assert_eq!(expand(&w, at(2024, 3, 3, 0, 0), at(2024, 3, 4, 9, 0)).count(), 0);
    }

    #[test]
    fn test_empty_or_inverted_query_yields_nothing() {
        let w = window(1, at(2024, 3, 4, 9, 0), at(2024, 3, 4, 17, 0), Recurrence::Daily, Some(at(2024, 4, 1, 0, 0)));
        assert_eq!(expand(&w, at(2024, 3, 5, 0, 0), at(2024, 3, 5, 0, 0)).count(), 0);
        assert_eq!(expand(&w, at(2024, 3, 6, 0, 0), at(2024, 3, 5, 0, 0)).count(), 0);
    }

    #[test]
    fn test_until_three_periods_gives_four_occurrences() {
        let start = at(2024, 1, 1, 8, 0);
        let end = at(2024, 1, 1, 10, 0);
        for (recurrence, period) in [
            (Recurrence::Daily, Duration::days(1)),
            (Recurrence::Weekly, Duration::weeks(1)),
        ] {
            let w = window(1, start, end, recurrence, Some(start + period * 3));
            let found = starts(expand(&w, start, start + period * 10));
            assert_eq!(found.len(), 4, "{recurrence}");
            assert!(found.iter().all(|s| *s <= start + period * 3));
        }

        let monthly = window(1, start, end, Recurrence::Monthly, Some(at(2024, 4, 1, 8, 0)));
        let found = starts(expand(&monthly, start, at(2024, 11, 1, 0, 0)));
        assert_eq!(
            found,
            vec![at(2024, 1, 1, 8, 0), at(2024, 2, 1, 8, 0), at(2024, 3, 1, 8, 0), at(2024, 4, 1, 8, 0)]
        );
    }

    #[test]
    fn test_expansion_seeks_instead_of_scanning() {
        let w = window(1, at(2020, 1, 1, 22, 0), at(2020, 1, 2, 2, 0), Recurrence::Daily, Some(at(2030, 1, 1, 0, 0)));
        // Query opens mid-occurrence: the one that began the evening before is included.
        let found: Vec<_> = expand(&w, at(2027, 6, 15, 1, 0), at(2027, 6, 15, 23, 0)).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].start, at(2027, 6, 14, 22, 0));
        assert_eq!(found[1].start, at(2027, 6, 15, 22, 0));
    }

    #[test]
    fn test_exceptions_are_skipped_not_terminal() {
        let mut w = window(1, at(2024, 3, 4, 9, 0), at(2024, 3, 4, 17, 0), Recurrence::Weekly, Some(at(2024, 4, 29, 9, 0)));
        w.exceptions.insert(at(2024, 3, 18, 9, 0));

        let found = starts(expand(&w, at(2024, 3, 1, 0, 0), at(2024, 4, 1, 0, 0)));
        assert_eq!(found, vec![at(2024, 3, 4, 9, 0), at(2024, 3, 11, 9, 0), at(2024, 3, 25, 9, 0)]);

        assert!(is_occurrence_start(&w, at(2024, 3, 18, 9, 0)));
        assert!(!is_occurrence_start(&w, at(2024, 3, 18, 10, 0)));
        assert!(!is_occurrence_start(&w, at(2024, 5, 6, 9, 0)));
    }

    #[test]
    fn test_monthly_clamps_to_month_end_without_drift() {
        let w = window(1, at(2024, 1, 31, 18, 0), at(2024, 1, 31, 20, 0), Recurrence::Monthly, Some(at(2024, 12, 31, 18, 0)));

        let february = starts(expand(&w, at(2024, 2, 1, 0, 0), at(2024, 3, 1, 0, 0)));
        assert_eq!(february, vec![at(2024, 2, 29, 18, 0)]);

        let spring = starts(expand(&w, at(2024, 3, 1, 0, 0), at(2024, 5, 1, 0, 0)));
        assert_eq!(spring, vec![at(2024, 3, 31, 18, 0), at(2024, 4, 30, 18, 0)]);

        let non_leap = window(2, at(2025, 1, 31, 18, 0), at(2025, 1, 31, 20, 0), Recurrence::Monthly, Some(at(2025, 6, 1, 0, 0)));
        let found: Vec<_> = expand(&non_leap, at(2025, 2, 1, 0, 0), at(2025, 3, 1, 0, 0)).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, at(2025, 2, 28, 18, 0));
        assert_eq!(found[0].end, at(2025, 2, 28, 20, 0));
    }

    #[test]
    fn test_back_to_back_daily_windows_do_not_overlap() {
        let until = Some(at(2024, 12, 31, 0, 0));
        let morning = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Daily, until);
        let evening = window(2, at(2024, 1, 1, 17, 0), at(2024, 1, 1, 20, 0), Recurrence::Daily, until);
        assert!(!windows_overlap(&morning, &evening));
        assert!(!windows_overlap(&evening, &morning));

        let same = window(3, at(2024, 2, 10, 9, 0), at(2024, 2, 10, 17, 0), Recurrence::Daily, until);
        assert!(windows_overlap(&morning, &same));
    }

    #[test]
    fn test_daily_overlap_requires_shared_lifetime() {
        let early = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Daily, Some(at(2024, 1, 31, 9, 0)));
        let late = window(2, at(2024, 2, 1, 9, 0), at(2024, 2, 1, 17, 0), Recurrence::Daily, Some(at(2024, 3, 1, 9, 0)));
        assert!(!windows_overlap(&early, &late));
    }

    #[test]
    fn test_weekly_against_daily_uses_time_of_day() {
        let until = Some(at(2024, 6, 30, 0, 0));
        let weekly = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 12, 0), Recurrence::Weekly, until);
        let nightly = window(2, at(2024, 1, 3, 20, 0), at(2024, 1, 3, 23, 0), Recurrence::Daily, until);
        let lunch = window(3, at(2024, 1, 3, 11, 0), at(2024, 1, 3, 13, 0), Recurrence::Daily, until);
        assert!(!windows_overlap(&weekly, &nightly));
        assert!(windows_overlap(&weekly, &lunch));
        assert!(windows_overlap(&lunch, &weekly));
    }

    #[test]
    fn test_weekly_windows_on_different_days_coexist() {
        let until = Some(at(2024, 6, 30, 0, 0));
        let monday = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Weekly, until);
        let tuesday = window(2, at(2024, 1, 2, 9, 0), at(2024, 1, 2, 17, 0), Recurrence::Weekly, until);
        assert!(!windows_overlap(&monday, &tuesday));
    }

    #[test]
    fn test_one_off_against_recurring() {
        let weekly = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Weekly, Some(at(2024, 3, 25, 9, 0)));
        let clash = window(2, at(2024, 2, 12, 16, 0), at(2024, 2, 12, 18, 0), Recurrence::None, None);
        let after_series = window(3, at(2024, 4, 1, 10, 0), at(2024, 4, 1, 11, 0), Recurrence::None, None);
        let tuesday = window(4, at(2024, 2, 13, 10, 0), at(2024, 2, 13, 11, 0), Recurrence::None, None);
        assert!(windows_overlap(&weekly, &clash));
        assert!(windows_overlap(&clash, &weekly));
        assert!(!windows_overlap(&weekly, &after_series));
        assert!(!windows_overlap(&weekly, &tuesday));
    }

    #[test]
    fn test_suppressed_occurrence_leaves_a_gap() {
        let mut weekly = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Weekly, Some(at(2024, 3, 25, 9, 0)));
        let one_off = window(2, at(2024, 2, 12, 10, 0), at(2024, 2, 12, 11, 0), Recurrence::None, None);
        assert!(windows_overlap(&weekly, &one_off));
        weekly.exceptions.insert(at(2024, 2, 12, 9, 0));
        assert!(!windows_overlap(&weekly, &one_off));
    }

    #[test]
    fn test_monthly_against_daily() {
        let until = Some(at(2030, 1, 1, 0, 0));
        let monthly = window(1, at(2024, 1, 31, 8, 0), at(2024, 1, 31, 9, 0), Recurrence::Monthly, until);
        let evening = window(2, at(2024, 1, 1, 18, 0), at(2024, 1, 1, 22, 0), Recurrence::Daily, until);
        let breakfast = window(3, at(2024, 1, 1, 8, 30), at(2024, 1, 1, 9, 30), Recurrence::Daily, until);
        assert!(!windows_overlap(&monthly, &evening));
        assert!(windows_overlap(&monthly, &breakfast));
    }

    #[test]
    fn test_find_overlap_ignores_disabled_and_self() {
        let until = Some(at(2024, 12, 31, 0, 0));
        let mut disabled = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 17, 0), Recurrence::Daily, until);
        disabled.enabled = false;
        let enabled = window(2, at(2024, 1, 1, 12, 0), at(2024, 1, 1, 13, 0), Recurrence::Daily, until);
        let candidate = window(3, at(2024, 1, 5, 10, 0), at(2024, 1, 5, 14, 0), Recurrence::Daily, until);

        let existing = vec![disabled, enabled, candidate.clone()];
        assert_eq!(find_overlap(&candidate, &existing), Some(2));
        assert_eq!(find_overlap(&candidate, &existing[..1]), None);

        let mut off = candidate.clone();
        off.enabled = false;
        assert_eq!(find_overlap(&off, &existing), None);
    }

    #[test]
    fn test_sub_second_bounds_use_phase_proof() {
        let until = Some(at(9999, 12, 30, 0, 0));
        let half = Duration::milliseconds(500);
        let morning = window(1, at(2024, 1, 1, 9, 0) + half, at(2024, 1, 1, 10, 0), Recurrence::Daily, until);
        let late_morning = window(2, at(2024, 1, 1, 11, 0) + half, at(2024, 1, 1, 12, 0), Recurrence::Daily, until);
        // Disjoint phases are settled arithmetically, without walking eight millennia of days.
        assert!(phases_disjoint(&morning, &late_morning));
        assert!(!windows_overlap(&morning, &late_morning));

        let touching = window(3, at(2024, 1, 1, 10, 0), at(2024, 1, 1, 10, 30), Recurrence::Daily, until);
        assert!(phases_disjoint(&morning, &touching));

        let straddling = window(4, at(2024, 1, 1, 10, 0) - half, at(2024, 1, 1, 10, 30), Recurrence::Weekly, until);
        assert!(!phases_disjoint(&morning, &straddling));
        assert!(windows_overlap(&morning, &straddling));
    }

    #[test]
    fn test_phase_reduction_matches_sweep() {
        let until = Some(at(2024, 3, 1, 0, 0));
        let base = window(1, at(2024, 1, 1, 9, 0), at(2024, 1, 1, 12, 0), Recurrence::Weekly, until);
        for offset_hours in 0..(24 * 7) {
            let start = at(2024, 1, 1, 0, 0) + Duration::hours(offset_hours);
            let other = window(2, start, start + Duration::hours(2), Recurrence::Daily, until);
            let swept = expand(&base, base.start, at(2024, 3, 2, 0, 0))
                .any(|o| expand(&other, o.start, o.end).next().is_some());
            assert_eq!(windows_overlap(&base, &other), swept, "offset {offset_hours}h");
        }
    }
}
