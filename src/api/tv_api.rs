use crate::api::screens_api::{playlist_with_fallback, ResolvedPlaylist};
use crate::error::ScheduleError;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;

pub const SCREEN_KEY_HEADER: &str = "x-screen-key";

/// Polled by the display itself: what should this screen be playing now?
pub async fn current_playlist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResolvedPlaylist>, ScheduleError> {
    let key = headers
        .get(SCREEN_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(ScheduleError::Unauthorized)?;

    let store = state.store.as_ref();
    let screen = store
        .find_screen_by_key(key)?
        .ok_or(ScheduleError::Unauthorized)?;

    let resolved = playlist_with_fallback(store, &screen, Utc::now().naive_utc())?;
    tracing::debug!(
        "Screen {} polled: playlist {:?} ({:?})",
        screen.id,
        resolved.playlist_id,
        resolved.source
    );
    Ok(Json(resolved))
}
