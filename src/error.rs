use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("{0}")]
    Validation(String),
    #[error("window overlaps existing window {window_id}")]
    Conflict { window_id: i32 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("not permitted to access {entity} {id}")]
    Forbidden { entity: &'static str, id: i32 },
    #[error(transparent)]
    Store(StoreError),
}

impl ScheduleError {
    pub fn validation(message: impl Into<String>) -> Self {
        ScheduleError::Validation(message.into())
    }

    fn kind(&self) -> &'static str {
        match self {
            ScheduleError::Validation(_) => "validation",
            ScheduleError::Conflict { .. } => "conflict",
            ScheduleError::NotFound { .. } => "not_found",
            ScheduleError::Unauthorized => "unauthorized",
            ScheduleError::Forbidden { .. } => "forbidden",
            ScheduleError::Store(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ScheduleError::Validation(_) => StatusCode::BAD_REQUEST,
            ScheduleError::Conflict { .. } => StatusCode::CONFLICT,
            ScheduleError::NotFound { .. } => StatusCode::NOT_FOUND,
            ScheduleError::Unauthorized => StatusCode::UNAUTHORIZED,
            ScheduleError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ScheduleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ScheduleError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => ScheduleError::NotFound { entity, id },
            StoreError::Conflict { window_id } => ScheduleError::Conflict { window_id },
            other => ScheduleError::Store(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    window_id: Option<i32>,
}

impl IntoResponse for ScheduleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ScheduleError::Store(e) => {
                tracing::error!("Storage failure: {}", e);
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let window_id = match &self {
            ScheduleError::Conflict { window_id } => Some(*window_id),
            _ => None,
        };

        let body = ErrorBody {
            error: self.kind(),
            message,
            window_id,
        };
        (status, Json(body)).into_response()
    }
}
