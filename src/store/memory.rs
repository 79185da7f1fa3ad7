use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    new_secret_key, PlaylistStore, ScheduleStore, ScreenStore, StoreError, StoreResult,
    WindowStore,
};
use crate::models::{NewWindow, Playlist, Schedule, ScheduleWindow, Screen};
use crate::services::recurrence;

#[derive(Debug, Default)]
struct State {
    last_id: i32,
    schedules: BTreeMap<i32, Schedule>,
    /// (schedule_id, screen_id)
    bindings: BTreeSet<(i32, i32)>,
    windows: BTreeMap<i32, ScheduleWindow>,
    playlists: BTreeMap<i32, Playlist>,
    screens: BTreeMap<i32, Screen>,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn schedule(&self, id: i32) -> StoreResult<&Schedule> {
        self.schedules.get(&id).ok_or(StoreError::NotFound {
            entity: "schedule",
            id,
        })
    }

    fn window(&self, id: i32) -> StoreResult<&ScheduleWindow> {
        self.windows.get(&id).ok_or(StoreError::NotFound {
            entity: "window",
            id,
        })
    }

    fn screen(&self, id: i32) -> StoreResult<&Screen> {
        self.screens.get(&id).ok_or(StoreError::NotFound {
            entity: "screen",
            id,
        })
    }

    fn check_overlap(&self, candidate: &ScheduleWindow) -> StoreResult<()> {
        let siblings = self
            .windows
            .values()
            .filter(|window| window.schedule_id == candidate.schedule_id);

        match recurrence::find_overlap(candidate, siblings) {
            Some(window_id) => Err(StoreError::Conflict { window_id }),
            None => Ok(()),
        }
    }
}

/// In-process reference store.
///
/// One lock guards all state, so every overlap check and the write that
/// follows it happen under the same write guard.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl ScheduleStore for MemoryStore {
    fn create_schedule(&self, name: &str, owner_id: i32) -> StoreResult<Schedule> {
        let mut state = self.write();
        let id = state.next_id();
        let created_at = now();
        let schedule = Schedule {
            id,
            owner_id,
            name: name.to_string(),
            created_at,
            updated_at: created_at,
        };
        state.schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    fn get_schedule(&self, id: i32) -> StoreResult<Schedule> {
        self.read().schedule(id).cloned()
    }

    fn delete_schedule(&self, id: i32) -> StoreResult<()> {
        let mut state = self.write();
        state.schedule(id)?;
        state.schedules.remove(&id);
        state.windows.retain(|_, window| window.schedule_id != id);
        state.bindings.retain(|(schedule_id, _)| *schedule_id != id);
        Ok(())
    }

    fn list_schedules_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Schedule>> {
        Ok(self
            .read()
            .schedules
            .values()
            .filter(|schedule| schedule.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn bind_screen(&self, schedule_id: i32, screen_id: i32) -> StoreResult<()> {
        let mut state = self.write();
        state.schedule(schedule_id)?;
        state.screen(screen_id)?;
        state.bindings.insert((schedule_id, screen_id));
        Ok(())
    }

    fn unbind_screen(&self, schedule_id: i32, screen_id: i32) -> StoreResult<()> {
        self.write().bindings.remove(&(schedule_id, screen_id));
        Ok(())
    }

    fn list_schedules_for_screen(&self, screen_id: i32) -> StoreResult<Vec<Schedule>> {
        let state = self.read();
        Ok(state
            .bindings
            .iter()
            .filter(|(_, bound_screen)| *bound_screen == screen_id)
            .filter_map(|(schedule_id, _)| state.schedules.get(schedule_id).cloned())
            .collect())
    }

    fn list_screens_for_schedule(&self, schedule_id: i32) -> StoreResult<Vec<i32>> {
        Ok(self
            .read()
            .bindings
            .iter()
            .filter(|(bound_schedule, _)| *bound_schedule == schedule_id)
            .map(|(_, screen_id)| *screen_id)
            .collect())
    }
}

impl WindowStore for MemoryStore {
    fn create_window(&self, new_window: &NewWindow) -> StoreResult<ScheduleWindow> {
        let mut state = self.write();
        state.schedule(new_window.schedule_id)?;
        if !state.playlists.contains_key(&new_window.playlist_id) {
            return Err(StoreError::NotFound {
                entity: "playlist",
                id: new_window.playlist_id,
            });
        }

        let id = state.last_id + 1;
        let window = new_window.clone().into_window(id, now());
        state.check_overlap(&window)?;

        state.next_id();
        state.windows.insert(id, window.clone());
        Ok(window)
    }

    fn get_window(&self, id: i32) -> StoreResult<ScheduleWindow> {
        self.read().window(id).cloned()
    }

    fn delete_window(&self, id: i32) -> StoreResult<()> {
        self.write()
            .windows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "window",
                id,
            })
    }

    fn add_occurrence_exception(
        &self,
        window_id: i32,
        occurrence_start: NaiveDateTime,
    ) -> StoreResult<()> {
        let mut state = self.write();
        let window = state.windows.get_mut(&window_id).ok_or(StoreError::NotFound {
            entity: "window",
            id: window_id,
        })?;
        window.exceptions.insert(occurrence_start);
        Ok(())
    }

    fn list_windows(&self, schedule_id: i32) -> StoreResult<Vec<ScheduleWindow>> {
        let state = self.read();
        state.schedule(schedule_id)?;
        Ok(state
            .windows
            .values()
            .filter(|window| window.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    fn set_window_enabled(&self, id: i32, enabled: bool) -> StoreResult<ScheduleWindow> {
        let mut state = self.write();
        let mut window = state.window(id)?.clone();
        window.enabled = enabled;
        state.check_overlap(&window)?;
        state.windows.insert(id, window.clone());
        Ok(window)
    }

    fn get_schedule_owning_window(&self, window_id: i32) -> StoreResult<Schedule> {
        let state = self.read();
        let schedule_id = state.window(window_id)?.schedule_id;
        state.schedule(schedule_id).cloned()
    }
}

impl PlaylistStore for MemoryStore {
    fn create_playlist(&self, name: &str, owner_id: i32) -> StoreResult<Playlist> {
        let mut state = self.write();
        let id = state.next_id();
        let created_at = now();
        let playlist = Playlist {
            id,
            owner_id,
            name: name.to_string(),
            created_at,
            updated_at: created_at,
        };
        state.playlists.insert(id, playlist.clone());
        Ok(playlist)
    }

    fn get_playlist(&self, id: i32) -> StoreResult<Playlist> {
        self.read()
            .playlists
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "playlist",
                id,
            })
    }

    fn list_playlists_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Playlist>> {
        Ok(self
            .read()
            .playlists
            .values()
            .filter(|playlist| playlist.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn delete_playlist(&self, id: i32) -> StoreResult<()> {
        let mut state = self.write();
        if state.playlists.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                entity: "playlist",
                id,
            });
        }
        state.windows.retain(|_, window| window.playlist_id != id);
        for screen in state.screens.values_mut() {
            if screen.playlist_id == Some(id) {
                screen.playlist_id = None;
            }
        }
        Ok(())
    }
}

impl ScreenStore for MemoryStore {
    fn create_screen(&self, name: &str, owner_id: i32) -> StoreResult<Screen> {
        let mut state = self.write();
        let id = state.next_id();
        let created_at = now();
        let screen = Screen {
            id,
            owner_id,
            name: name.to_string(),
            secret_key: new_secret_key(),
            playlist_id: None,
            created_at,
            updated_at: created_at,
        };
        state.screens.insert(id, screen.clone());
        Ok(screen)
    }

    fn get_screen(&self, id: i32) -> StoreResult<Screen> {
        self.read().screen(id).cloned()
    }

    fn find_screen_by_key(&self, secret_key: &str) -> StoreResult<Option<Screen>> {
        Ok(self
            .read()
            .screens
            .values()
            .find(|screen| screen.secret_key == secret_key)
            .cloned())
    }

    fn list_screens_for_owner(&self, owner_id: i32) -> StoreResult<Vec<Screen>> {
        Ok(self
            .read()
            .screens
            .values()
            .filter(|screen| screen.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn delete_screen(&self, id: i32) -> StoreResult<()> {
        let mut state = self.write();
        if state.screens.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                entity: "screen",
                id,
            });
        }
        state.bindings.retain(|(_, screen_id)| *screen_id != id);
        Ok(())
    }

    fn assign_playlist(&self, screen_id: i32, playlist_id: Option<i32>) -> StoreResult<Screen> {
        let mut state = self.write();
        if let Some(playlist_id) = playlist_id {
            if !state.playlists.contains_key(&playlist_id) {
                return Err(StoreError::NotFound {
                    entity: "playlist",
                    id: playlist_id,
                });
            }
        }
        let screen = state.screens.get_mut(&screen_id).ok_or(StoreError::NotFound {
            entity: "screen",
            id: screen_id,
        })?;
        screen.playlist_id = playlist_id;
        screen.updated_at = now();
        Ok(screen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recurrence;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn daily(schedule_id: i32, playlist_id: i32, from: u32, to: u32) -> NewWindow {
        NewWindow {
            schedule_id,
            playlist_id,
            start: at(1, from),
            end: at(1, to),
            recurrence: Recurrence::Daily,
            recur_until: Some(at(31, 0)),
            priority: 0,
            enabled: true,
        }
    }

    #[test]
    fn test_bindings_are_idempotent() {
        let store = MemoryStore::new();
        let schedule = store.create_schedule("Lobby", 1).unwrap();
        let screen = store.create_screen("Lobby TV", 1).unwrap();

        store.bind_screen(schedule.id, screen.id).unwrap();
        store.bind_screen(schedule.id, screen.id).unwrap();
        assert_eq!(store.list_schedules_for_screen(screen.id).unwrap(), vec![schedule.clone()]);

        store.unbind_screen(schedule.id, screen.id).unwrap();
        store.unbind_screen(schedule.id, screen.id).unwrap();
        assert!(store.list_schedules_for_screen(screen.id).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_rejected_per_schedule() {
        let store = MemoryStore::new();
        let playlist = store.create_playlist("Menu", 1).unwrap();
        let first = store.create_schedule("A", 1).unwrap();
        let second = store.create_schedule("B", 1).unwrap();

        let a = store.create_window(&daily(first.id, playlist.id, 9, 17)).unwrap();
        let err = store.create_window(&daily(first.id, playlist.id, 9, 17)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { window_id } if window_id == a.id));

        store.create_window(&daily(second.id, playlist.id, 9, 17)).unwrap();
        assert_eq!(store.list_windows(first.id).unwrap().len(), 1);
    }

    #[test]
    fn test_reenabling_is_checked() {
        let store = MemoryStore::new();
        let playlist = store.create_playlist("Menu", 1).unwrap();
        let schedule = store.create_schedule("A", 1).unwrap();

        let a = store.create_window(&daily(schedule.id, playlist.id, 9, 17)).unwrap();
        store.set_window_enabled(a.id, false).unwrap();
        let b = store.create_window(&daily(schedule.id, playlist.id, 12, 14)).unwrap();

        let err = store.set_window_enabled(a.id, true).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { window_id } if window_id == b.id));
        assert!(!store.get_window(a.id).unwrap().enabled);
        assert_eq!(store.list_enabled_windows(schedule.id).unwrap(), vec![b]);
    }

    #[test]
    fn test_delete_schedule_cascades() {
        let store = MemoryStore::new();
        let playlist = store.create_playlist("Menu", 1).unwrap();
        let schedule = store.create_schedule("A", 1).unwrap();
        let screen = store.create_screen("TV", 1).unwrap();
        let window = store.create_window(&daily(schedule.id, playlist.id, 9, 17)).unwrap();
        store.bind_screen(schedule.id, screen.id).unwrap();

        store.delete_schedule(schedule.id).unwrap();
        assert!(matches!(store.get_window(window.id), Err(StoreError::NotFound { .. })));
        assert!(store.list_schedules_for_screen(screen.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_playlist_clears_references() {
        let store = MemoryStore::new();
        let playlist = store.create_playlist("Menu", 1).unwrap();
        let schedule = store.create_schedule("A", 1).unwrap();
        let screen = store.create_screen("TV", 1).unwrap();
        store.create_window(&daily(schedule.id, playlist.id, 9, 17)).unwrap();
        store.assign_playlist(screen.id, Some(playlist.id)).unwrap();

        store.delete_playlist(playlist.id).unwrap();
        assert!(store.list_windows(schedule.id).unwrap().is_empty());
        assert_eq!(store.get_screen(screen.id).unwrap().playlist_id, None);
    }

    #[test]
    fn test_concurrent_creation_admits_one() {
        let store = Arc::new(MemoryStore::new());
        let playlist = store.create_playlist("Menu", 1).unwrap();
        let schedule = store.create_schedule("A", 1).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let new_window = daily(schedule.id, playlist.id, 9, 17);
                std::thread::spawn(move || store.create_window(&new_window).is_ok())
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.list_windows(schedule.id).unwrap().len(), 1);
    }
}
