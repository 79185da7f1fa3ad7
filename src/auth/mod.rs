pub mod jwt;
pub mod middleware;

use crate::error::ScheduleError;
use crate::models::{Schedule, Screen};
use crate::store::Store;

/// Ownership checks layered above the scheduling core.
pub fn ensure_schedule_owner(
    store: &dyn Store,
    schedule_id: i32,
    user_id: i32,
) -> Result<Schedule, ScheduleError> {
    let schedule = store.get_schedule(schedule_id)?;
    if schedule.owner_id != user_id {
        return Err(ScheduleError::Forbidden {
            entity: "schedule",
            id: schedule_id,
        });
    }
    Ok(schedule)
}

pub fn ensure_window_owner(
    store: &dyn Store,
    window_id: i32,
    user_id: i32,
) -> Result<Schedule, ScheduleError> {
    let schedule = store.get_schedule_owning_window(window_id)?;
    if schedule.owner_id != user_id {
        return Err(ScheduleError::Forbidden {
            entity: "window",
            id: window_id,
        });
    }
    Ok(schedule)
}

pub fn ensure_playlist_owner(
    store: &dyn Store,
    playlist_id: i32,
    user_id: i32,
) -> Result<(), ScheduleError> {
    if store.get_playlist_owner(playlist_id)? != user_id {
        return Err(ScheduleError::Forbidden {
            entity: "playlist",
            id: playlist_id,
        });
    }
    Ok(())
}

pub fn ensure_screen_owner(
    store: &dyn Store,
    screen_id: i32,
    user_id: i32,
) -> Result<Screen, ScheduleError> {
    let screen = store.get_screen(screen_id)?;
    if screen.owner_id != user_id {
        return Err(ScheduleError::Forbidden {
            entity: "screen",
            id: screen_id,
        });
    }
    Ok(screen)
}
