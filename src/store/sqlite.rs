use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::collections::{BTreeSet, HashMap};

use super::{
    new_secret_key, PlaylistStore, ScheduleStore, ScreenStore, StoreError, StoreResult,
    WindowStore,
};
use crate::db::{DbConnection, DbPool};
use crate::models::{
    NewPlaylist, NewSchedule, NewScheduleScreen, NewScreen, NewWindow, NewWindowException,
    Playlist, Schedule, ScheduleWindow, ScheduleWindowRow, Screen,
};
use crate::services::recurrence;

/// Diesel-backed store over an r2d2 SQLite pool.
///
/// Window writes that need an overlap check run in an immediate
/// transaction: SQLite takes its write lock at `BEGIN`, so checks on the
/// same database are serialized.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }
}

fn not_found(entity: &'static str, id: i32) -> StoreError {
    StoreError::NotFound { entity, id }
}

fn find_schedule(conn: &mut SqliteConnection, schedule_id: i32) -> StoreResult<Schedule> {
    use crate::schema::schedules::dsl::*;

    schedules
        .filter(id.eq(schedule_id))
        .select(Schedule::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| not_found("schedule", schedule_id))
}

fn find_playlist(conn: &mut SqliteConnection, playlist_id: i32) -> StoreResult<Playlist> {
    use crate::schema::playlists::dsl::*;

    playlists
        .filter(id.eq(playlist_id))
        .select(Playlist::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| not_found("playlist", playlist_id))
}

fn find_screen(conn: &mut SqliteConnection, screen_id: i32) -> StoreResult<Screen> {
    use crate::schema::screens::dsl::*;

    screens
        .filter(id.eq(screen_id))
        .select(Screen::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| not_found("screen", screen_id))
}

fn load_exceptions(
    conn: &mut SqliteConnection,
    window_ids: Vec<i32>,
) -> QueryResult<HashMap<i32, BTreeSet<NaiveDateTime>>> {
    use crate::schema::schedule_window_exceptions::dsl::*;

    let rows: Vec<(i32, NaiveDateTime)> = schedule_window_exceptions
        .filter(window_id.eq_any(window_ids))
        .select((window_id, occurrence_start))
        .load(conn)?;

    let mut by_window: HashMap<i32, BTreeSet<NaiveDateTime>> = HashMap::new();
    for (owner, start) in rows {
        by_window.entry(owner).or_default().insert(start);
    }
    Ok(by_window)
}

fn window_from_row(
    row: ScheduleWindowRow,
    exceptions: BTreeSet<NaiveDateTime>,
) -> StoreResult<ScheduleWindow> {
    let id = row.id;
    ScheduleWindow::from_row(row, exceptions).map_err(|reason| StoreError::InvalidRow {
        entity: "window",
        id,
        reason,
    })
}

fn load_windows(conn: &mut SqliteConnection, for_schedule: i32) -> StoreResult<Vec<ScheduleWindow>> {
    use crate::schema::schedule_windows::dsl::*;

    let rows: Vec<ScheduleWindowRow> = schedule_windows
        .filter(schedule_id.eq(for_schedule))
        .order(id.asc())
        .select(ScheduleWindowRow::as_select())
        .load(conn)?;

    let mut exceptions = load_exceptions(conn, rows.iter().map(|row| row.id).collect())?;
    rows.into_iter()
        .map(|row| {
            let suppressed = exceptions.remove(&row.id).unwrap_or_default();
            window_from_row(row, suppressed)
        })
        .collect()
}

fn find_window(conn: &mut SqliteConnection, window_id: i32) -> StoreResult<ScheduleWindow> {
    use crate::schema::schedule_windows::dsl::*;

    let row: ScheduleWindowRow = schedule_windows
        .filter(id.eq(window_id))
        .select(ScheduleWindowRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| not_found("window", window_id))?;

    let mut exceptions = load_exceptions(conn, vec![window_id])?;
    let suppressed = exceptions.remove(&window_id).unwrap_or_default();
    window_from_row(row, suppressed)
}

fn check_overlap(conn: &mut SqliteConnection, candidate: &ScheduleWindow) -> StoreResult<()> {
    let siblings = load_windows(conn, candidate.schedule_id)?;
    match recurrence::find_overlap(candidate, &siblings) {
        Some(window_id) => Err(StoreError::Conflict { window_id }),
        None => Ok(()),
    }
}

impl ScheduleStore for SqliteStore {
    fn create_schedule(&self, name: &str, owner_id: i32) -> StoreResult<Schedule> {
        use crate::schema::schedules;

        let mut conn = self.conn()?;
        let schedule = diesel::insert_into(schedules::table)
            .values(&NewSchedule { owner_id, name })
            .returning(Schedule::as_returning())
            .get_result(&mut conn)?;
        Ok(schedule)
    }

    fn get_schedule(&self, id: i32) -> StoreResult<Schedule> {
        let mut conn = self.conn()?;
        find_schedule(&mut conn, id)
    }

    fn delete_schedule(&self, id: i32) -> StoreResult<()> {
        use crate::schema::{schedule_screens, schedule_window_exceptions, schedule_windows, schedules};

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            find_schedule(conn, id)?;

            let windows = schedule_windows::table
                .filter(schedule_windows::schedule_id.eq(id))
                .select(schedule_windows::id);
            diesel::delete(
                schedule_window_exceptions::table
                    .filter(schedule_window_exceptions::window_id.eq_any(windows)),
            )
            .execute(conn)?;
            diesel::delete(schedule_windows::table.filter(schedule_windows::schedule_id.eq(id)))
                .execute(conn)?;
            diesel::delete(schedule_screens::table.filter(schedule_screens::schedule_id.eq(id)))
                .execute(conn)?;
            diesel::delete(schedules::table.filter(schedules::id.eq(id))).execute(conn)?;
            Ok(())
        })
    }

    fn list_schedules_for_owner(&self, for_owner: i32) -> StoreResult<Vec<Schedule>> {
        use crate::schema::schedules::dsl::*;

        let mut conn = self.conn()?;
        let results = schedules
            .filter(owner_id.eq(for_owner))
            .order(id.asc())
            .select(Schedule::as_select())
            .load(&mut conn)?;
        Ok(results)
    }

    fn bind_screen(&self, schedule_id: i32, screen_id: i32) -> StoreResult<()> {
        use crate::schema::schedule_screens;

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            find_schedule(conn, schedule_id)?;
            find_screen(conn, screen_id)?;
            diesel::insert_or_ignore_into(schedule_screens::table)
                .values(&NewScheduleScreen {
                    schedule_id,
                    screen_id,
                })
                .execute(conn)?;
            Ok(())
        })
    }

    fn unbind_screen(&self, for_schedule: i32, for_screen: i32) -> StoreResult<()> {
        use crate::schema::schedule_screens::dsl::*;

        let mut conn = self.conn()?;
        diesel::delete(
            schedule_screens
                .filter(schedule_id.eq(for_schedule))
                .filter(screen_id.eq(for_screen)),
        )
        .execute(&mut conn)?;
        Ok(())
    }

    fn list_schedules_for_screen(&self, screen_id: i32) -> StoreResult<Vec<Schedule>> {
        use crate::schema::{schedule_screens, schedules};

        let mut conn = self.conn()?;
        let results = schedule_screens::table
            .inner_join(schedules::table)
            .filter(schedule_screens::screen_id.eq(screen_id))
            .order(schedules::id.asc())
            .select(Schedule::as_select())
            .load(&mut conn)?;
        Ok(results)
    }

    fn list_screens_for_schedule(&self, for_schedule: i32) -> StoreResult<Vec<i32>> {
        use crate::schema::schedule_screens::dsl::*;

        let mut conn = self.conn()?;
        let results = schedule_screens
            .filter(schedule_id.eq(for_schedule))
            .order(screen_id.asc())
            .select(screen_id)
            .load(&mut conn)?;
        Ok(results)
    }
}

impl WindowStore for SqliteStore {
    fn create_window(&self, new_window: &NewWindow) -> StoreResult<ScheduleWindow> {
        use crate::schema::schedule_windows;

        let mut conn = self.conn()?;
        // Insert first so the candidate has its id, then check against the
        // rest of the schedule; a conflict rolls the insert back.
        conn.immediate_transaction(|conn| {
            find_schedule(conn, new_window.schedule_id)?;
            find_playlist(conn, new_window.playlist_id)?;

            let row = diesel::insert_into(schedule_windows::table)
                .values(&new_window.to_row())
                .returning(ScheduleWindowRow::as_returning())
                .get_result(conn)?;
            let window = window_from_row(row, BTreeSet::new())?;

            check_overlap(conn, &window)?;
            Ok(window)
        })
    }

    fn get_window(&self, id: i32) -> StoreResult<ScheduleWindow> {
        let mut conn = self.conn()?;
        find_window(&mut conn, id)
    }

    fn delete_window(&self, id: i32) -> StoreResult<()> {
        use crate::schema::{schedule_window_exceptions, schedule_windows};

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            diesel::delete(
                schedule_window_exceptions::table
                    .filter(schedule_window_exceptions::window_id.eq(id)),
            )
            .execute(conn)?;
            let deleted = diesel::delete(schedule_windows::table.filter(schedule_windows::id.eq(id)))
                .execute(conn)?;
            if deleted == 0 {
                return Err(not_found("window", id));
            }
            Ok(())
        })
    }

    fn add_occurrence_exception(
        &self,
        window_id: i32,
        occurrence_start: NaiveDateTime,
    ) -> StoreResult<()> {
        use crate::schema::{schedule_window_exceptions, schedule_windows};

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            let exists = schedule_windows::table
                .filter(schedule_windows::id.eq(window_id))
                .select(schedule_windows::id)
                .first::<i32>(conn)
                .optional()?;
            if exists.is_none() {
                return Err(not_found("window", window_id));
            }

            diesel::insert_or_ignore_into(schedule_window_exceptions::table)
                .values(&NewWindowException {
                    window_id,
                    occurrence_start,
                })
                .execute(conn)?;
            Ok(())
        })
    }

    fn list_windows(&self, schedule_id: i32) -> StoreResult<Vec<ScheduleWindow>> {
        let mut conn = self.conn()?;
        find_schedule(&mut conn, schedule_id)?;
        load_windows(&mut conn, schedule_id)
    }

    fn set_window_enabled(&self, window_id: i32, is_enabled: bool) -> StoreResult<ScheduleWindow> {
        use crate::schema::schedule_windows::dsl::*;

        let mut conn = self.conn()?;
        conn.immediate_transaction(|conn| {
            let updated = diesel::update(schedule_windows.filter(id.eq(window_id)))
                .set(enabled.eq(is_enabled))
                .execute(conn)?;
            if updated == 0 {
                return Err(not_found("window", window_id));
            }

            let window = find_window(conn, window_id)?;
            check_overlap(conn, &window)?;
            Ok(window)
        })
    }

    fn get_schedule_owning_window(&self, window_id: i32) -> StoreResult<Schedule> {
        use crate::schema::{schedule_windows, schedules};

        let mut conn = self.conn()?;
        schedule_windows::table
            .inner_join(schedules::table)
            .filter(schedule_windows::id.eq(window_id))
            .select(Schedule::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| not_found("window", window_id))
    }
}

impl PlaylistStore for SqliteStore {
    fn create_playlist(&self, name: &str, owner_id: i32) -> StoreResult<Playlist> {
        use crate::schema::playlists;

        let mut conn = self.conn()?;
        let playlist = diesel::insert_into(playlists::table)
            .values(&NewPlaylist { owner_id, name })
            .returning(Playlist::as_returning())
            .get_result(&mut conn)?;
        Ok(playlist)
    }

    fn get_playlist(&self, id: i32) -> StoreResult<Playlist> {
        let mut conn = self.conn()?;
        find_playlist(&mut conn, id)
    }

    fn list_playlists_for_owner(&self, for_owner: i32) -> StoreResult<Vec<Playlist>> {
        use crate::schema::playlists::dsl::*;

        let mut conn = self.conn()?;
        let results = playlists
            .filter(owner_id.eq(for_owner))
            .order(id.asc())
            .select(Playlist::as_select())
            .load(&mut conn)?;
        Ok(results)
    }

    fn delete_playlist(&self, id: i32) -> StoreResult<()> {
        use crate::schema::{playlists, schedule_window_exceptions, schedule_windows, screens};

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            find_playlist(conn, id)?;

            let windows = schedule_windows::table
                .filter(schedule_windows::playlist_id.eq(id))
                .select(schedule_windows::id);
            diesel::delete(
                schedule_window_exceptions::table
                    .filter(schedule_window_exceptions::window_id.eq_any(windows)),
            )
            .execute(conn)?;
            diesel::delete(schedule_windows::table.filter(schedule_windows::playlist_id.eq(id)))
                .execute(conn)?;
            diesel::update(screens::table.filter(screens::playlist_id.eq(id)))
                .set(screens::playlist_id.eq(None::<i32>))
                .execute(conn)?;
            diesel::delete(playlists::table.filter(playlists::id.eq(id))).execute(conn)?;
            Ok(())
        })
    }
}

impl ScreenStore for SqliteStore {
    fn create_screen(&self, name: &str, owner_id: i32) -> StoreResult<Screen> {
        use crate::schema::screens;

        let mut conn = self.conn()?;
        let secret_key = new_secret_key();
        let screen = diesel::insert_into(screens::table)
            .values(&NewScreen {
                owner_id,
                name,
                secret_key: &secret_key,
            })
            .returning(Screen::as_returning())
            .get_result(&mut conn)?;
        Ok(screen)
    }

    fn get_screen(&self, id: i32) -> StoreResult<Screen> {
        let mut conn = self.conn()?;
        find_screen(&mut conn, id)
    }

    fn find_screen_by_key(&self, key: &str) -> StoreResult<Option<Screen>> {
        use crate::schema::screens::dsl::*;

        let mut conn = self.conn()?;
        let screen = screens
            .filter(secret_key.eq(key))
            .select(Screen::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(screen)
    }

    fn list_screens_for_owner(&self, for_owner: i32) -> StoreResult<Vec<Screen>> {
        use crate::schema::screens::dsl::*;

        let mut conn = self.conn()?;
        let results = screens
            .filter(owner_id.eq(for_owner))
            .order(id.asc())
            .select(Screen::as_select())
            .load(&mut conn)?;
        Ok(results)
    }

    fn delete_screen(&self, id: i32) -> StoreResult<()> {
        use crate::schema::{schedule_screens, screens};

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            diesel::delete(schedule_screens::table.filter(schedule_screens::screen_id.eq(id)))
                .execute(conn)?;
            let deleted =
                diesel::delete(screens::table.filter(screens::id.eq(id))).execute(conn)?;
            if deleted == 0 {
                return Err(not_found("screen", id));
            }
            Ok(())
        })
    }

    fn assign_playlist(&self, screen_id: i32, playlist: Option<i32>) -> StoreResult<Screen> {
        use crate::schema::screens::dsl::*;

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            if let Some(playlist) = playlist {
                find_playlist(conn, playlist)?;
            }

            diesel::update(screens.filter(id.eq(screen_id)))
                .set((
                    playlist_id.eq(playlist),
                    updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(Screen::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| not_found("screen", screen_id))
        })
    }
}
