use crate::auth::jwt::Claims;
use crate::auth::ensure_playlist_owner;
use crate::error::ScheduleError;
use crate::models::Playlist;
use crate::services::notifier::notify_screens;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreatePlaylistRequest {
    pub name: String,
}

pub async fn list_playlists(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Playlist>>, ScheduleError> {
    Ok(Json(state.store.list_playlists_for_owner(claims.user_id)?))
}

pub async fn create_playlist(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePlaylistRequest>,
) -> Result<(StatusCode, Json<Playlist>), ScheduleError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ScheduleError::validation("playlist name must not be empty"));
    }

    let playlist = state.store.create_playlist(name, claims.user_id)?;
    tracing::info!("User {} created playlist {}", claims.user_id, playlist.id);
    Ok((StatusCode::CREATED, Json(playlist)))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(playlist_id): Path<i32>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    ensure_playlist_owner(store, playlist_id, claims.user_id)?;
    store.delete_playlist(playlist_id)?;
    tracing::info!("User {} deleted playlist {}", claims.user_id, playlist_id);

    // Windows and direct assignments may have gone with it; only the
    // owner's screens can have referenced the playlist.
    let screen_ids = store
        .list_screens_for_owner(claims.user_id)?
        .into_iter()
        .map(|screen| screen.id)
        .collect();
    notify_screens(state.notifier.clone(), screen_ids);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{app, send, state, token_for};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_playlists_are_scoped_to_owner() {
        let state = state();
        let alice = token_for(&state, 1);
        let bob = token_for(&state, 2);
        let app = app(state);

        let (status, _) = send(
            &app,
            "POST",
            "/api/playlists",
            Some(&alice),
            Some(json!({ "name": "Morning news" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, mine) = send(&app, "GET", "/api/playlists", Some(&alice), None).await;
        let (_, theirs) = send(&app, "GET", "/api/playlists", Some(&bob), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert!(theirs.as_array().unwrap().is_empty());

        let (status, _) = send(
            &app,
            "POST",
            "/api/playlists",
            Some(&alice),
            Some(json!({ "name": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deleting_playlist_clears_direct_assignment() {
        let state = state();
        let token = token_for(&state, 1);
        let playlist = state.store.create_playlist("Idle loop", 1).unwrap();
        let screen = state.store.create_screen("Lobby TV", 1).unwrap();
        state
            .store
            .assign_playlist(screen.id, Some(playlist.id))
            .unwrap();
        let store = state.store.clone();
        let app = app(state);

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/playlists/{}", playlist.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(store.get_screen(screen.id).unwrap().playlist_id, None);
        assert!(store.get_playlist(playlist.id).is_err());
    }
}
