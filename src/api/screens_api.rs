use crate::auth::jwt::Claims;
use crate::auth::{ensure_playlist_owner, ensure_screen_owner};
use crate::error::ScheduleError;
use crate::models::Screen;
use crate::services::notifier::notify_screens;
use crate::services::schedule_service;
use crate::store::Store;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreateScreenRequest {
    pub name: String,
}

/// The secret key is only ever returned here, at creation.
#[derive(Serialize)]
pub struct CreatedScreen {
    #[serde(flatten)]
    pub screen: Screen,
    pub secret_key: String,
}

#[derive(Deserialize)]
pub struct AssignPlaylistRequest {
    pub playlist_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistSource {
    Schedule,
    Direct,
    None,
}

#[derive(Debug, Serialize)]
pub struct ResolvedPlaylist {
    pub screen_id: i32,
    pub at: NaiveDateTime,
    pub playlist_id: Option<i32>,
    pub source: PlaylistSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
}

impl ResolvedPlaylist {
    /// Falls back to the screen's direct playlist when no scheduled window
    /// claims it.
    fn new(
        screen: &Screen,
        at: NaiveDateTime,
        scheduled: Option<i32>,
        window_id: Option<i32>,
    ) -> Self {
        let (playlist_id, source) = match (scheduled, screen.playlist_id) {
            (Some(playlist_id), _) => (Some(playlist_id), PlaylistSource::Schedule),
            (None, Some(direct)) => (Some(direct), PlaylistSource::Direct),
            (None, None) => (None, PlaylistSource::None),
        };

        ResolvedPlaylist {
            screen_id: screen.id,
            at,
            playlist_id,
            source,
            window_id: window_id.filter(|_| source == PlaylistSource::Schedule),
        }
    }
}

/// What `screen` should show at `at`, naming the winning window if any.
pub fn resolve_with_fallback(
    store: &dyn Store,
    screen: &Screen,
    at: NaiveDateTime,
) -> Result<ResolvedPlaylist, ScheduleError> {
    let winner = schedule_service::active_occurrence_for_screen_at(store, screen.id, at)?;
    Ok(ResolvedPlaylist::new(
        screen,
        at,
        winner.as_ref().map(|occurrence| occurrence.playlist_id),
        winner.map(|occurrence| occurrence.window_id),
    ))
}

/// Playlist only, as the screen itself needs it.
pub fn playlist_with_fallback(
    store: &dyn Store,
    screen: &Screen,
    at: NaiveDateTime,
) -> Result<ResolvedPlaylist, ScheduleError> {
    let scheduled = schedule_service::resolve_playlist_for_screen_at(store, screen.id, at)?;
    Ok(ResolvedPlaylist::new(screen, at, scheduled, None))
}

pub async fn list_screens(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Screen>>, ScheduleError> {
    Ok(Json(state.store.list_screens_for_owner(claims.user_id)?))
}

pub async fn create_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateScreenRequest>,
) -> Result<(StatusCode, Json<CreatedScreen>), ScheduleError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ScheduleError::validation("screen name must not be empty"));
    }

    let screen = state.store.create_screen(name, claims.user_id)?;
    tracing::info!("User {} registered screen {}", claims.user_id, screen.id);

    let secret_key = screen.secret_key.clone();
    Ok((StatusCode::CREATED, Json(CreatedScreen { screen, secret_key })))
}

pub async fn get_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(screen_id): Path<i32>,
) -> Result<Json<Screen>, ScheduleError> {
    let screen = ensure_screen_owner(state.store.as_ref(), screen_id, claims.user_id)?;
    Ok(Json(screen))
}

pub async fn delete_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(screen_id): Path<i32>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    ensure_screen_owner(store, screen_id, claims.user_id)?;
    store.delete_screen(screen_id)?;
    tracing::info!("User {} deleted screen {}", claims.user_id, screen_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_playlist(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(screen_id): Path<i32>,
    Json(req): Json<AssignPlaylistRequest>,
) -> Result<Json<Screen>, ScheduleError> {
    let store = state.store.as_ref();
    ensure_screen_owner(store, screen_id, claims.user_id)?;
    if let Some(playlist_id) = req.playlist_id {
        ensure_playlist_owner(store, playlist_id, claims.user_id)?;
    }

    let screen = store.assign_playlist(screen_id, req.playlist_id)?;
    tracing::info!(
        "Screen {} direct playlist set to {:?}",
        screen_id,
        screen.playlist_id
    );

    notify_screens(state.notifier.clone(), vec![screen_id]);
    Ok(Json(screen))
}

pub async fn resolve_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(screen_id): Path<i32>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolvedPlaylist>, ScheduleError> {
    let store = state.store.as_ref();
    let screen = ensure_screen_owner(store, screen_id, claims.user_id)?;
    let at = query.at.unwrap_or_else(|| Utc::now().naive_utc());
    Ok(Json(resolve_with_fallback(store, &screen, at)?))
}
