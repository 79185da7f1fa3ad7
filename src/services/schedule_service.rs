use chrono::{Duration, NaiveDateTime};
use std::cmp::Ordering;

use crate::error::ScheduleError;
use crate::models::{NewWindow, Occurrence, ScheduleWindow};
use crate::services::recurrence;
use crate::store::{ScheduleStore, ScreenStore, WindowStore};

/// Calendar listings are capped so a single request cannot expand years of
/// daily windows.
pub const MAX_LISTING_RANGE_DAYS: i64 = 366;

/// Which occurrences of a window a delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    All,
    One(NaiveDateTime),
}

/// Orders occurrences by how strongly they claim a screen: higher priority,
/// then the most recently begun, then the lowest window id.
fn claim_order(a: &Occurrence, b: &Occurrence) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.start.cmp(&b.start))
        .then(b.window_id.cmp(&a.window_id))
}

/// Picks the occurrence a screen should show from those active at one instant.
pub fn pick_winner<I>(active: I) -> Option<Occurrence>
where
    I: IntoIterator<Item = Occurrence>,
{
    active.into_iter().max_by(claim_order)
}

/// Occurrences of `windows` covering `instant`.
fn active_occurrences(windows: &[ScheduleWindow], instant: NaiveDateTime) -> Vec<Occurrence> {
    // Expansion seeks from the query start, so a one-second query still finds
    // occurrences that began long before `instant`.
    let probe_end = instant + Duration::seconds(1);
    windows
        .iter()
        .filter(|window| window.enabled)
        .flat_map(|window| recurrence::expand(window, instant, probe_end))
        .filter(|occurrence| occurrence.is_active_at(instant))
        .collect()
}

/// The occurrence that wins `screen_id` at `instant`, across all bound schedules.
pub fn active_occurrence_for_screen_at<S>(
    store: &S,
    screen_id: i32,
    instant: NaiveDateTime,
) -> Result<Option<Occurrence>, ScheduleError>
where
    S: ScheduleStore + WindowStore + ScreenStore + ?Sized,
{
    store.get_screen(screen_id)?;

    let mut active = Vec::new();
    for schedule in store.list_schedules_for_screen(screen_id)? {
        let windows = store.list_enabled_windows(schedule.id)?;
        active.extend(active_occurrences(&windows, instant));
    }

    let winner = pick_winner(active);
    tracing::debug!(
        "Resolved screen {} at {}: {:?}",
        screen_id,
        instant,
        winner.as_ref().map(|o| o.window_id)
    );
    Ok(winner)
}

/// Which playlist `screen_id` should show at `instant`; `None` when no
/// scheduled window is active.
pub fn resolve_playlist_for_screen_at<S>(
    store: &S,
    screen_id: i32,
    instant: NaiveDateTime,
) -> Result<Option<i32>, ScheduleError>
where
    S: ScheduleStore + WindowStore + ScreenStore + ?Sized,
{
    Ok(active_occurrence_for_screen_at(store, screen_id, instant)?.map(|o| o.playlist_id))
}

/// All occurrences of a schedule's enabled windows intersecting `[from, to)`,
/// sorted by start, then priority (descending), then window id.
pub fn list_occurrences<S>(
    store: &S,
    schedule_id: i32,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<Vec<Occurrence>, ScheduleError>
where
    S: WindowStore + ?Sized,
{
    if to <= from {
        return Err(ScheduleError::validation("'to' must be after 'from'"));
    }
    if to - from > Duration::days(MAX_LISTING_RANGE_DAYS) {
        return Err(ScheduleError::validation(format!(
            "range may span at most {} days",
            MAX_LISTING_RANGE_DAYS
        )));
    }

    let windows = store.list_enabled_windows(schedule_id)?;
    let mut occurrences: Vec<Occurrence> = windows
        .iter()
        .flat_map(|window| recurrence::expand(window, from, to))
        .collect();

    occurrences.sort_by(listing_order);
    Ok(occurrences)
}

/// Calendar order: start, then priority (highest first), then window id.
fn listing_order(a: &Occurrence, b: &Occurrence) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(b.priority.cmp(&a.priority))
        .then(a.window_id.cmp(&b.window_id))
}

/// Rejects malformed windows before anything touches storage.
pub fn validate_new_window(new_window: &NewWindow) -> Result<(), ScheduleError> {
    if new_window.end <= new_window.start {
        return Err(ScheduleError::validation("window end must be after its start"));
    }

    match (new_window.recurrence.min_period(), new_window.recur_until) {
        (None, Some(_)) => Err(ScheduleError::validation(
            "recur_until is only allowed on recurring windows",
        )),
        (Some(_), None) => Err(ScheduleError::validation(format!(
            "recur_until is required for {} windows",
            new_window.recurrence
        ))),
        (Some(_), Some(until)) if until < new_window.start => Err(ScheduleError::validation(
            "recur_until must not be before the window start",
        )),
        (Some(period), Some(_)) if new_window.end - new_window.start > period => {
            Err(ScheduleError::validation(format!(
                "a {} window may last at most {} days",
                new_window.recurrence,
                period.num_days()
            )))
        }
        _ => Ok(()),
    }
}

pub fn create_window<S>(store: &S, new_window: NewWindow) -> Result<ScheduleWindow, ScheduleError>
where
    S: WindowStore + ?Sized,
{
    validate_new_window(&new_window)?;

    let window = store.create_window(&new_window).map_err(|e| {
        tracing::info!(
            "Window rejected on schedule {}: {}",
            new_window.schedule_id,
            e
        );
        ScheduleError::from(e)
    })?;

    tracing::info!(
        "Created {} window {} on schedule {}",
        window.recurrence,
        window.id,
        window.schedule_id
    );
    Ok(window)
}

pub fn delete_window<S>(store: &S, window_id: i32, scope: DeleteScope) -> Result<(), ScheduleError>
where
    S: WindowStore + ?Sized,
{
    match scope {
        DeleteScope::All => {
            store.delete_window(window_id)?;
            tracing::info!("Deleted window {}", window_id);
        }
        DeleteScope::One(occurrence_start) => {
            let window = store.get_window(window_id)?;
            if !recurrence::is_occurrence_start(&window, occurrence_start) {
                return Err(ScheduleError::validation(format!(
                    "{} is not an occurrence of window {}",
                    occurrence_start, window_id
                )));
            }
            store.add_occurrence_exception(window_id, occurrence_start)?;
            tracing::info!(
                "Suppressed occurrence {} of window {}",
                occurrence_start,
                window_id
            );
        }
    }
    Ok(())
}

pub fn set_window_enabled<S>(
    store: &S,
    window_id: i32,
    enabled: bool,
) -> Result<ScheduleWindow, ScheduleError>
where
    S: WindowStore + ?Sized,
{
    Ok(store.set_window_enabled(window_id, enabled)?)
}
