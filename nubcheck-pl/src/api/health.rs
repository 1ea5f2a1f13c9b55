//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// Outbox jobs not yet processed or failed; `None` if the store is unreachable
    pub jobs_open: Option<i64>,
}

/// GET /health
///
/// Does not require authentication. Reports "degraded" when the store
/// cannot be queried.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs_open = match state.store.count_open_jobs().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::error!(error = %e, "Health check could not query store");
            None
        }
    };

    Json(HealthResponse {
        status: if jobs_open.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "nubcheck-pl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs_open,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
