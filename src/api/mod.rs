pub mod playlists_api;
pub mod schedules_api;
pub mod screens_api;
pub mod tv_api;

use crate::AppState;
use axum::{
    middleware,
    routing::{delete, get, put},
    Router,
};

pub fn routes(state: AppState) -> Router<AppState> {
    let protected_routes = Router::new()
        // Schedules
        .route(
            "/schedules",
            get(schedules_api::list_schedules).post(schedules_api::create_schedule),
        )
        .route(
            "/schedules/:id",
            get(schedules_api::get_schedule).delete(schedules_api::delete_schedule),
        )
        .route(
            "/schedules/:id/windows",
            get(schedules_api::list_windows).post(schedules_api::create_window),
        )
        .route(
            "/schedules/:id/windows/:window_id",
            delete(schedules_api::delete_window),
        )
        .route(
            "/schedules/:id/windows/:window_id/enabled",
            put(schedules_api::set_window_enabled),
        )
        .route(
            "/schedules/:id/occurrences",
            get(schedules_api::list_occurrences),
        )
        .route(
            "/schedules/:id/screens/:screen_id",
            put(schedules_api::bind_screen).delete(schedules_api::unbind_screen),
        )
        // Screens
        .route(
            "/screens",
            get(screens_api::list_screens).post(screens_api::create_screen),
        )
        .route(
            "/screens/:id",
            get(screens_api::get_screen).delete(screens_api::delete_screen),
        )
        .route("/screens/:id/playlist", put(screens_api::assign_playlist))
        .route("/screens/:id/resolve", get(screens_api::resolve_screen))
        // Playlists
        .route(
            "/playlists",
            get(playlists_api::list_playlists).post(playlists_api::create_playlist),
        )
        .route("/playlists/:id", delete(playlists_api::delete_playlist))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::auth::middleware::auth_middleware,
        ));

    Router::new()
        // Screen-facing, authenticated by the screen's secret key
        .route("/tv/playlist", get(tv_api::current_playlist))
        .merge(protected_routes)
}

/// Tells every screen bound to `schedule_id` that its schedule changed.
/// Lookup failures are logged; the mutation already succeeded.
pub(crate) fn notify_schedule_screens(state: &AppState, schedule_id: i32) {
    match state.store.list_screens_for_schedule(schedule_id) {
        Ok(screen_ids) => {
            crate::services::notifier::notify_screens(state.notifier.clone(), screen_ids)
        }
        Err(e) => tracing::warn!(
            "Could not list screens of schedule {} for notification: {}",
            schedule_id,
            e
        ),
    }
}
