//! Customer-facing prediction polling

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use nubcheck_common::{Prediction, PredictionStatus, ResolutionResult, Verdict};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::images::ImageStore;
use crate::{ApiResult, AppState};

/// Full prediction plus a freshly signed image URL (admin listings)
#[derive(Debug, Serialize)]
pub struct PredictionView {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub image_url: String,
}

impl PredictionView {
    pub fn new(prediction: Prediction, images: &dyn ImageStore) -> Self {
        let image_url = images.resolve_read_url(&prediction.image_ref);
        Self {
            prediction,
            image_url,
        }
    }
}

/// What a customer may see of their own prediction
#[derive(Debug, Serialize)]
pub struct CustomerPrediction {
    pub id: String,
    pub status: PredictionStatus,
    pub ai_prediction: Option<Verdict>,
    pub ai_confidence: Option<f64>,
    pub final_result: Option<ResolutionResult>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub image_url: String,
}

impl CustomerPrediction {
    fn new(prediction: Prediction, images: &dyn ImageStore) -> Self {
        Self {
            image_url: images.resolve_read_url(&prediction.image_ref),
            id: prediction.id,
            status: prediction.status,
            ai_prediction: prediction.ai_prediction,
            ai_confidence: prediction.ai_confidence,
            final_result: prediction.final_result,
            reviewed_at: prediction.reviewed_at,
            created_at: prediction.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: CustomerPrediction,
}

/// GET /api/predictions/:id
pub async fn get_prediction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PredictionResponse>> {
    let prediction = state.lifecycle.require(&id).await?;
    Ok(Json(PredictionResponse {
        prediction: CustomerPrediction::new(prediction, state.images.as_ref()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub wait_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    /// "resolved" or "under_review"
    pub state: &'static str,
    pub final_result: Option<ResolutionResult>,
    pub status: PredictionStatus,
    /// Waiting longer than a reviewer normally takes
    pub under_expert_review: bool,
}

fn result_response(prediction: &Prediction, review_notice_after_secs: i64, now: DateTime<Utc>) -> ResultResponse {
    let resolved = prediction.is_resolved();
    let age_secs = (now - prediction.created_at).num_seconds();
    ResultResponse {
        state: if resolved { "resolved" } else { "under_review" },
        final_result: prediction.final_result,
        status: prediction.status,
        under_expert_review: !resolved && age_secs > review_notice_after_secs,
    }
}

/// GET /api/predictions/:id/result?wait_secs=N
///
/// Long-polls until the prediction is resolved or the bounded wait ends.
/// An unresolved prediction is a normal answer, never an error.
pub async fn wait_for_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<WaitParams>,
) -> ApiResult<Json<ResultResponse>> {
    let wait = Duration::from_secs(params.wait_secs.min(state.config.polling.max_wait_secs));
    let prediction = state.lifecycle.wait_for_result(&id, wait).await?;

    Ok(Json(result_response(
        &prediction,
        state.config.polling.review_notice_after_secs,
        Utc::now(),
    )))
}

pub fn prediction_routes() -> Router<AppState> {
    Router::new()
        .route("/api/predictions/:id", get(get_prediction))
        .route("/api/predictions/:id/result", get(wait_for_result))
}
