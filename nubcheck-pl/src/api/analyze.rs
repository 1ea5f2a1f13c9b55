//! Synchronous classification trigger

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub prediction_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    /// BOY, GIRL, UNCLEAR or INVALID
    pub prediction: String,
    pub confidence: f64,
    pub explanation: String,
    pub auto_resolved: bool,
}

/// POST /api/analyze
///
/// Runs the classifier now instead of waiting for the queued job. A
/// classifier failure leaves the AI fields empty and returns 500.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let prediction_id = request
        .prediction_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing prediction ID".to_string()))?;

    let outcome = state.lifecycle.classify(prediction_id.trim()).await?;
    let classification = outcome.classification;

    Ok(Json(AnalyzeResponse {
        success: true,
        prediction: classification.verdict.token().to_string(),
        confidence: classification.confidence,
        explanation: classification.explanation,
        auto_resolved: outcome.auto_resolved,
    }))
}

pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/api/analyze", post(analyze))
}
