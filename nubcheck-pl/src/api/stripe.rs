//! Payment provider webhook

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::payments::webhook::verify_delivery;
use crate::payments::EventOutcome;
use crate::{ApiError, ApiResult, AppState};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// POST /api/webhooks/stripe
///
/// The raw body is verified against the signature header before anything
/// is parsed; any verification failure is a 400 and touches no rows.
/// Verified events are applied idempotently, so a 500 from a store error is
/// safe for the provider to redeliver.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let now = Utc::now();

    let delivery = verify_delivery(
        &body,
        signature,
        state.config.payments.stripe_webhook_secret.as_deref(),
        state.config.payments.signature_tolerance_secs,
        now.timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Payment webhook rejected");
        ApiError::BadRequest(format!("Webhook Error: {}", e))
    })?;

    let outcome = state.reconciler.apply_event(&delivery.event, now).await?;
    match outcome {
        EventOutcome::Ignored => {
            tracing::info!(event_type = %delivery.event_type, event_id = %delivery.event_id, "Unhandled event type");
        }
        EventOutcome::Unmatched => {
            tracing::info!(event_type = %delivery.event_type, event_id = %delivery.event_id, "Event matched no prediction");
        }
        EventOutcome::Applied { changed } => {
            tracing::info!(
                event_type = %delivery.event_type,
                event_id = %delivery.event_id,
                changed,
                "Payment event applied"
            );
        }
    }

    let first_delivery = state
        .store
        .record_webhook_event(&delivery.event_id, &delivery.event_type, now)
        .await?;
    if !first_delivery {
        tracing::debug!(event_id = %delivery.event_id, "Replayed delivery");
    }

    state.wake.notify_one();
    Ok(Json(json!({ "received": true })))
}

pub fn stripe_routes() -> Router<AppState> {
    Router::new().route("/api/webhooks/stripe", post(stripe_webhook))
}
