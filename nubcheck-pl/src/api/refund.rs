//! Customer refund requests

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub prediction_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub success: bool,
}

/// POST /api/refund/request
///
/// Records the request and alerts the operators; it does not move money.
pub async fn request_refund(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<Json<RefundResponse>> {
    let prediction_id = request
        .prediction_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing prediction ID".to_string()))?;

    state
        .lifecycle
        .request_refund(prediction_id.trim(), request.reason.as_deref())
        .await?;

    Ok(Json(RefundResponse { success: true }))
}

pub fn refund_routes() -> Router<AppState> {
    Router::new().route("/api/refund/request", post(request_refund))
}
