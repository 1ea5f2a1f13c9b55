//! Bot callback webhook
//!
//! The shared-secret header is checked before the body is looked at.
//! Once authenticated the endpoint always answers `{ok: true}`, so the
//! bot platform never redelivers a press that was already handled.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use nubcheck_common::signing::secrets_match;
use nubcheck_common::ReviewMessageRef;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::review::ReviewCallback;
use crate::{ApiError, ApiResult, AppState};

pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

#[derive(Debug, Deserialize)]
pub struct Update {
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl From<CallbackQuery> for ReviewCallback {
    fn from(query: CallbackQuery) -> Self {
        let (message, caption) = match query.message {
            Some(m) => (
                Some(ReviewMessageRef {
                    chat_id: m.chat.id,
                    message_id: m.message_id,
                }),
                m.caption,
            ),
            None => (None, None),
        };
        ReviewCallback {
            callback_id: query.id,
            data: query.data,
            message,
            caption,
        }
    }
}

/// POST /api/telegram/webhook
pub async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let Some(expected) = state.config.review.telegram_webhook_secret.as_deref() else {
        tracing::error!("review.telegram_webhook_secret not configured, rejecting bot webhook");
        return Err(ApiError::Misconfigured("Bot webhook secret not configured".to_string()));
    };

    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(provided, expected) {
        tracing::warn!("Bot webhook rejected: bad secret token");
        return Err(ApiError::Unauthorized("Invalid secret token".to_string()));
    }

    // Updates we cannot decode are acknowledged so the platform stops resending them
    let update: Update = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable bot update");
            return Ok(Json(json!({ "ok": true })));
        }
    };

    if let Some(query) = update.callback_query {
        let answer = state.arbiter.handle_callback(&query.into()).await;
        tracing::debug!(answer = %answer, "Review callback handled");
    }

    Ok(Json(json!({ "ok": true })))
}

pub fn telegram_routes() -> Router<AppState> {
    Router::new().route("/api/telegram/webhook", post(telegram_webhook))
}
