//! Bearer-token authentication for admin routes

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use nubcheck_common::signing::secrets_match;

use crate::{ApiError, AppState};

/// Token from an `Authorization: Bearer <token>` header
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Admin authentication middleware
///
/// With no `admin.token` configured the routes are open (startup logs a
/// warning). Applied to admin routes only.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.admin.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    match bearer_token(&request) {
        Some(provided) if secrets_match(provided, expected) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Admin request with wrong token");
            Err(ApiError::Unauthorized("Invalid admin token".to_string()))
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Admin request without token");
            Err(ApiError::Unauthorized("Missing bearer token".to_string()))
        }
    }
}
