//! Operator endpoints: manual resolution, listings, referral codes

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use nubcheck_common::{ReferralCode, ResolutionResult};
use serde::{Deserialize, Serialize};

use super::PredictionView;
use crate::store::{ResolutionSource, ResolveOutcome};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub prediction_id: Option<String>,
    pub result: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub success: bool,
    /// True when an earlier resolution stands and this call changed nothing
    pub already_resolved: bool,
    pub final_result: Option<ResolutionResult>,
}

/// POST /api/admin/confirm
pub async fn confirm(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<ConfirmResponse>> {
    let prediction_id = request
        .prediction_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing prediction ID".to_string()))?;
    let result = request
        .result
        .as_deref()
        .map(|r| r.trim().to_ascii_lowercase())
        .and_then(|r| ResolutionResult::from_token(&r))
        .ok_or_else(|| ApiError::BadRequest("Result must be boy, girl or unclear".to_string()))?;

    let outcome = state
        .lifecycle
        .resolve(prediction_id.trim(), result, ResolutionSource::Admin)
        .await?;

    match outcome {
        ResolveOutcome::Resolved(p) => Ok(Json(ConfirmResponse {
            success: true,
            already_resolved: false,
            final_result: p.final_result,
        })),
        ResolveOutcome::AlreadyResolved(p) => Ok(Json(ConfirmResponse {
            success: true,
            already_resolved: true,
            final_result: p.final_result,
        })),
        ResolveOutcome::NotFound => Err(ApiError::NotFound(format!("Prediction {}", prediction_id))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PredictionList {
    pub predictions: Vec<PredictionView>,
}

/// GET /api/admin/predictions?limit=N
pub async fn list_predictions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<PredictionList>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let predictions = state
        .store
        .list_recent(limit)
        .await?
        .into_iter()
        .map(|p| PredictionView::new(p, state.images.as_ref()))
        .collect();

    Ok(Json(PredictionList { predictions }))
}

#[derive(Debug, Deserialize)]
pub struct CreateReferralRequest {
    pub code: String,
    pub influencer_name: String,
    /// Pence per attributed sale
    #[serde(default)]
    pub commission_per_sale: i64,
}

#[derive(Debug, Serialize)]
pub struct ReferralList {
    pub referral_codes: Vec<ReferralCode>,
}

/// GET /api/admin/referrals
pub async fn list_referrals(State(state): State<AppState>) -> ApiResult<Json<ReferralList>> {
    let referral_codes = state.store.list_referral_codes().await?;
    Ok(Json(ReferralList { referral_codes }))
}

/// POST /api/admin/referrals
pub async fn create_referral(
    State(state): State<AppState>,
    Json(request): Json<CreateReferralRequest>,
) -> ApiResult<Json<ReferralCode>> {
    let code = request.code.trim();
    if code.is_empty() {
        return Err(ApiError::BadRequest("Referral code must not be empty".to_string()));
    }
    if request.commission_per_sale < 0 {
        return Err(ApiError::BadRequest("Commission must not be negative".to_string()));
    }

    let created = state
        .store
        .create_referral_code(
            code,
            request.influencer_name.trim(),
            request.commission_per_sale,
            Utc::now(),
        )
        .await
        .map_err(|e| match e {
            nubcheck_common::Error::InvalidInput(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        })?;

    tracing::info!(code = %created.code, influencer = %created.influencer_name, "Referral code created");
    Ok(Json(created))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/confirm", post(confirm))
        .route("/api/admin/predictions", get(list_predictions))
        .route("/api/admin/referrals", get(list_referrals).post(create_referral))
}
