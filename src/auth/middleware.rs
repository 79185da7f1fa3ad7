use crate::auth::jwt::verify_token;
use crate::error::ScheduleError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ScheduleError> {
    let token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ScheduleError::Unauthorized)?;

    let claims = verify_token(token, &state.config.jwt.secret).map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        ScheduleError::Unauthorized
    })?;

    // Attach claims to request extensions
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
