//! Persistence seams for schedules, windows, playlists and screens.
//!
//! Stores are plain CRUD with one exception: `WindowStore::create_window`
//! and `WindowStore::set_window_enabled` must run the recurrence overlap
//! check and the write inside one critical section per schedule, so two
//! concurrent writers can never both pass the check.

pub mod memory;
pub mod sqlite;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::{NewWindow, Playlist, Schedule, ScheduleWindow, Screen};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
    #[error("window overlaps existing window {window_id}")]
    Conflict { window_id: i32 },
    #[error("{entity} {id} is corrupt: {reason}")]
    InvalidRow {
        entity: &'static str,
        id: i32,
        reason: String,
    },
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait ScheduleStore {
    fn create_schedule(&self, name: &str, owner_id: i32) -> StoreResult<Schedule>;
    fn get_schedule(&self, id: i32) -> StoreResult<Schedule>;
    /// Cascades to windows, their exceptions and screen bindings.
    fn delete_schedule(&self, id: i32) -> StoreResult<()>;
    fn list_schedules_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Schedule>>;
    /// Idempotent.
    fn bind_screen(&self, schedule_id: i32, screen_id: i32) -> StoreResult<()>;
    /// Idempotent.
    fn unbind_screen(&self, schedule_id: i32, screen_id: i32) -> StoreResult<()>;
    fn list_schedules_for_screen(&self, screen_id: i32) -> StoreResult<Vec<Schedule>>;
    fn list_screens_for_schedule(&self, schedule_id: i32) -> StoreResult<Vec<i32>>;
}

pub trait WindowStore {
    /// Inserts the window unless it overlaps an enabled window on the same
    /// schedule, in which case `StoreError::Conflict` names the first one.
    fn create_window(&self, new_window: &NewWindow) -> StoreResult<ScheduleWindow>;
    fn get_window(&self, id: i32) -> StoreResult<ScheduleWindow>;
    /// Removes the window and all of its exceptions.
    fn delete_window(&self, id: i32) -> StoreResult<()>;
    /// Idempotent.
    fn add_occurrence_exception(
        &self,
        window_id: i32,
        occurrence_start: NaiveDateTime,
    ) -> StoreResult<()>;
    fn list_windows(&self, schedule_id: i32) -> StoreResult<Vec<ScheduleWindow>>;
    /// Enabling re-runs the overlap check under the same guarantees as creation.
    fn set_window_enabled(&self, id: i32, enabled: bool) -> StoreResult<ScheduleWindow>;
    fn get_schedule_owning_window(&self, window_id: i32) -> StoreResult<Schedule>;

    fn list_enabled_windows(&self, schedule_id: i32) -> StoreResult<Vec<ScheduleWindow>> {
        let mut windows = self.list_windows(schedule_id)?;
        windows.retain(|window| window.enabled);
        Ok(windows)
    }
}

pub trait PlaylistStore {
    fn create_playlist(&self, name: &str, owner_id: i32) -> StoreResult<Playlist>;
    fn get_playlist(&self, id: i32) -> StoreResult<Playlist>;
    fn list_playlists_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Playlist>>;
    /// Windows playing the playlist are deleted; screens lose their direct assignment.
    fn delete_playlist(&self, id: i32) -> StoreResult<()>;

    fn get_playlist_owner(&self, id: i32) -> StoreResult<i32> {
        self.get_playlist(id).map(|playlist| playlist.owner_id)
    }
}

pub trait ScreenStore {
    fn create_screen(&self, name: &str, owner_id: i32) -> StoreResult<Screen>;
    fn get_screen(&self, id: i32) -> StoreResult<Screen>;
    fn find_screen_by_key(&self, secret_key: &str) -> StoreResult<Option<Screen>>;
    fn list_screens_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Screen>>;
    /// Also removes the screen's schedule bindings.
    fn delete_screen(&self, id: i32) -> StoreResult<()>;
    fn assign_playlist(&self, screen_id: i32, playlist_id: Option<i32>) -> StoreResult<Screen>;

    fn get_screen_owner(&self, id: i32) -> StoreResult<i32> {
        self.get_screen(id).map(|screen| screen.owner_id)
    }
}

/// Everything the HTTP surface needs, as one object.
pub trait Store: ScheduleStore + WindowStore + PlaylistStore + ScreenStore + Send + Sync {}

impl<T> Store for T where T: ScheduleStore + WindowStore + PlaylistStore + ScreenStore + Send + Sync {}

pub(crate) fn new_secret_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
