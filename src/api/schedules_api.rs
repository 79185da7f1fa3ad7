use crate::api::notify_schedule_screens;
use crate::auth::jwt::Claims;
use crate::auth::{
    ensure_playlist_owner, ensure_schedule_owner, ensure_screen_owner, ensure_window_owner,
};
use crate::error::ScheduleError;
use crate::models::{NewWindow, Occurrence, Recurrence, Schedule, ScheduleWindow};
use crate::services::notifier::notify_screens;
use crate::services::schedule_service::{self, DeleteScope};
use crate::store::Store;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDateTime;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateWindowRequest {
    pub playlist_id: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub recur_until: Option<NaiveDateTime>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
pub struct DeleteWindowQuery {
    pub scope: Option<String>,
    pub occurrence_start: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct OccurrencesQuery {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl DeleteWindowQuery {
    fn into_scope(self) -> Result<DeleteScope, ScheduleError> {
        match (self.scope.as_deref().unwrap_or("all"), self.occurrence_start) {
            ("all", _) => Ok(DeleteScope::All),
            ("one", Some(start)) => Ok(DeleteScope::One(start)),
            ("one", None) => Err(ScheduleError::validation(
                "occurrence_start is required when scope is 'one'",
            )),
            (other, _) => Err(ScheduleError::validation(format!(
                "unknown delete scope '{}'",
                other
            ))),
        }
    }
}

/// The window, provided it is owned by the caller and lives on `schedule_id`.
fn window_in_schedule(
    store: &dyn Store,
    schedule_id: i32,
    window_id: i32,
    user_id: i32,
) -> Result<ScheduleWindow, ScheduleError> {
    ensure_schedule_owner(store, schedule_id, user_id)?;
    ensure_window_owner(store, window_id, user_id)?;
    let window = store.get_window(window_id)?;
    if window.schedule_id != schedule_id {
        return Err(ScheduleError::NotFound {
            entity: "window",
            id: window_id,
        });
    }
    Ok(window)
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Schedule>>, ScheduleError> {
    Ok(Json(state.store.list_schedules_for_owner(claims.user_id)?))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ScheduleError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ScheduleError::validation("schedule name must not be empty"));
    }

    let schedule = state.store.create_schedule(name, claims.user_id)?;
    tracing::info!(
        "User {} created schedule {} ({})",
        claims.user_id,
        schedule.id,
        schedule.name
    );
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<Schedule>, ScheduleError> {
    let schedule = ensure_schedule_owner(state.store.as_ref(), schedule_id, claims.user_id)?;
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<i32>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;

    // Collected first: the bindings go away with the schedule.
    let screen_ids = store.list_screens_for_schedule(schedule_id)?;
    store.delete_schedule(schedule_id)?;
    tracing::info!("User {} deleted schedule {}", claims.user_id, schedule_id);

    notify_screens(state.notifier.clone(), screen_ids);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_windows(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<Vec<ScheduleWindow>>, ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;
    Ok(Json(store.list_windows(schedule_id)?))
}

pub async fn create_window(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<i32>,
    Json(req): Json<CreateWindowRequest>,
) -> Result<(StatusCode, Json<ScheduleWindow>), ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;
    ensure_playlist_owner(store, req.playlist_id, claims.user_id)?;

    let recurrence = match req.recurrence.as_deref() {
        None => Recurrence::None,
        Some(tag) => tag.parse().map_err(ScheduleError::Validation)?,
    };

    let new_window = NewWindow {
        schedule_id,
        playlist_id: req.playlist_id,
        start: req.start,
        end: req.end,
        recurrence,
        recur_until: req.recur_until,
        priority: req.priority,
        enabled: req.enabled,
    };
    let window = schedule_service::create_window(store, new_window)?;

    notify_schedule_screens(&state, schedule_id);
    Ok((StatusCode::CREATED, Json(window)))
}

pub async fn delete_window(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((schedule_id, window_id)): Path<(i32, i32)>,
    Query(query): Query<DeleteWindowQuery>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    let scope = query.into_scope()?;
    window_in_schedule(store, schedule_id, window_id, claims.user_id)?;

    schedule_service::delete_window(store, window_id, scope)?;

    notify_schedule_screens(&state, schedule_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_window_enabled(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((schedule_id, window_id)): Path<(i32, i32)>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<Json<ScheduleWindow>, ScheduleError> {
    let store = state.store.as_ref();
    window_in_schedule(store, schedule_id, window_id, claims.user_id)?;

    let window = schedule_service::set_window_enabled(store, window_id, req.enabled)?;
    tracing::info!(
        "Window {} {}",
        window_id,
        if window.enabled { "enabled" } else { "disabled" }
    );

    notify_schedule_screens(&state, schedule_id);
    Ok(Json(window))
}

pub async fn list_occurrences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<i32>,
    Query(query): Query<OccurrencesQuery>,
) -> Result<Json<Vec<Occurrence>>, ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;
    let occurrences = schedule_service::list_occurrences(store, schedule_id, query.from, query.to)?;
    Ok(Json(occurrences))
}

pub async fn bind_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((schedule_id, screen_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;
    ensure_screen_owner(store, screen_id, claims.user_id)?;

    store.bind_screen(schedule_id, screen_id)?;
    tracing::info!("Bound screen {} to schedule {}", screen_id, schedule_id);

    notify_screens(state.notifier.clone(), vec![screen_id]);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unbind_screen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((schedule_id, screen_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ScheduleError> {
    let store = state.store.as_ref();
    ensure_schedule_owner(store, schedule_id, claims.user_id)?;
    ensure_screen_owner(store, screen_id, claims.user_id)?;

    store.unbind_screen(schedule_id, screen_id)?;
    tracing::info!("Unbound screen {} from schedule {}", screen_id, schedule_id);

    notify_screens(state.notifier.clone(), vec![screen_id]);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{app, send, state, token_for};
    use axum::http::StatusCode;
    use serde_json::json;

    fn daily_nine_to_five(playlist_id: i32) -> serde_json::Value {
        json!({
            "playlist_id": playlist_id,
            "start": "2024-01-01T09:00:00",
            "end": "2024-01-01T17:00:00",
            "recurrence": "daily",
            "recur_until": "2024-12-31T09:00:00",
        })
    }

    #[tokio::test]
    async fn test_requests_without_token_are_unauthorized() {
        let app = app(state());
        let (status, body) = send(&app, "GET", "/api/schedules", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = send(&app, "GET", "/api/schedules", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_overlapping_window_is_a_conflict() {
        let state = state();
        let token = token_for(&state, 1);
        let schedule = state.store.create_schedule("Lobby", 1).unwrap();
        let playlist = state.store.create_playlist("Welcome", 1).unwrap();
        let app = app(state);

        let uri = format!("/api/schedules/{}/windows", schedule.id);
        let (status, first) =
            send(&app, "POST", &uri, Some(&token), Some(daily_nine_to_five(playlist.id))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            send(&app, "POST", &uri, Some(&token), Some(daily_nine_to_five(playlist.id))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["window_id"], first["id"]);
    }

    #[tokio::test]
    async fn test_invalid_window_is_rejected() {
        let state = state();
        let token = token_for(&state, 1);
        let schedule = state.store.create_schedule("Lobby", 1).unwrap();
        let playlist = state.store.create_playlist("Welcome", 1).unwrap();
        let app = app(state);
        let uri = format!("/api/schedules/{}/windows", schedule.id);

        let mut body = daily_nine_to_five(playlist.id);
        body["recurrence"] = json!("hourly");
        let (status, json) = send(&app, "POST", &uri, Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation");

        let mut body = daily_nine_to_five(playlist.id);
        body["end"] = json!("2024-01-01T08:00:00");
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_users_schedule_is_forbidden() {
        let state = state();
        let intruder = token_for(&state, 2);
        let schedule = state.store.create_schedule("Lobby", 1).unwrap();
        let app = app(state);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/schedules/{}", schedule.id),
            Some(&intruder),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = send(&app, "GET", "/api/schedules/999", Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_one_occurrence_hides_it_from_listing() {
        let state = state();
        let token = token_for(&state, 1);
        let schedule = state.store.create_schedule("Lobby", 1).unwrap();
        let playlist = state.store.create_playlist("Welcome", 1).unwrap();
        let app = app(state);

        let uri = format!("/api/schedules/{}/windows", schedule.id);
        let (_, window) =
            send(&app, "POST", &uri, Some(&token), Some(daily_nine_to_five(playlist.id))).await;

        let delete_uri = format!(
            "/api/schedules/{}/windows/{}?scope=one&occurrence_start=2024-01-02T09:00:00",
            schedule.id, window["id"]
        );
        let (status, _) = send(&app, "DELETE", &delete_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let list_uri = format!(
            "/api/schedules/{}/occurrences?from=2024-01-01T00:00:00&to=2024-01-04T00:00:00",
            schedule.id
        );
        let (status, occurrences) = send(&app, "GET", &list_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let starts: Vec<&str> = occurrences
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["start"].as_str().unwrap())
            .collect();
        assert_eq!(starts, vec!["2024-01-01T09:00:00", "2024-01-03T09:00:00"]);

        let missing_start = format!(
            "/api/schedules/{}/windows/{}?scope=one",
            schedule.id, window["id"]
        );
        let (status, _) = send(&app, "DELETE", &missing_start, Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_window_must_belong_to_schedule_in_path() {
        let state = state();
        let token = token_for(&state, 1);
        let lobby = state.store.create_schedule("Lobby", 1).unwrap();
        let cafe = state.store.create_schedule("Cafe", 1).unwrap();
        let playlist = state.store.create_playlist("Welcome", 1).unwrap();
        let app = app(state);

        let (_, window) = send(
            &app,
            "POST",
            &format!("/api/schedules/{}/windows", lobby.id),
            Some(&token),
            Some(daily_nine_to_five(playlist.id)),
        )
        .await;

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/schedules/{}/windows/{}", cafe.id, window["id"]),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
