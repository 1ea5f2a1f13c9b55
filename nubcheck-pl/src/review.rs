//! Review arbitration for bot button presses
//!
//! A button carries `"<result>:<prediction id>"`. The press funnels into the
//! same guarded resolve as the admin endpoint; the prompt is then annotated
//! and its buttons removed so nobody acts on it again.

use nubcheck_common::{Prediction, ResolutionResult, ReviewMessageRef};

use crate::lifecycle::Lifecycle;
use crate::notify::{templates, Notifier};
use crate::store::{ResolutionSource, ResolveOutcome};

/// Decoded button payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub result: ResolutionResult,
    pub prediction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDataError {
    /// No separator or no prediction id
    Malformed,
    UnknownResult(String),
}

/// Parse `"<result>:<prediction id>"`, splitting at the first colon
pub fn parse_callback_data(data: &str) -> Result<ReviewDecision, CallbackDataError> {
    let (token, prediction_id) = data.split_once(':').ok_or(CallbackDataError::Malformed)?;
    let prediction_id = prediction_id.trim();
    if prediction_id.is_empty() {
        return Err(CallbackDataError::Malformed);
    }

    let token = token.trim().to_ascii_lowercase();
    let result = ResolutionResult::from_token(&token)
        .ok_or(CallbackDataError::UnknownResult(token))?;

    Ok(ReviewDecision {
        result,
        prediction_id: prediction_id.to_string(),
    })
}

/// Channel-neutral button press
#[derive(Debug, Clone, Default)]
pub struct ReviewCallback {
    pub callback_id: String,
    pub data: Option<String>,
    /// Message the button was attached to, when the channel reports it
    pub message: Option<ReviewMessageRef>,
    pub caption: Option<String>,
}

#[derive(Clone)]
pub struct ReviewArbiter {
    lifecycle: Lifecycle,
    notifier: Notifier,
}

impl ReviewArbiter {
    pub fn new(lifecycle: Lifecycle, notifier: Notifier) -> Self {
        Self {
            lifecycle,
            notifier,
        }
    }

    /// Handle one button press; returns the toast shown to the reviewer
    ///
    /// Never fails: the channel gets an answer for every press, and the
    /// prompt edit is best-effort once the resolution is committed.
    pub async fn handle_callback(&self, callback: &ReviewCallback) -> String {
        let answer = match parse_callback_data(callback.data.as_deref().unwrap_or_default()) {
            Err(CallbackDataError::Malformed) => {
                tracing::warn!(data = ?callback.data, "Invalid review button data");
                "Invalid button data".to_string()
            }
            Err(CallbackDataError::UnknownResult(token)) => {
                tracing::warn!(token = %token, "Unknown review result type");
                "Unknown result type".to_string()
            }
            Ok(decision) => self.apply(callback, decision).await,
        };

        if let Err(e) = self
            .notifier
            .review_channel()
            .answer_callback(&callback.callback_id, &answer)
            .await
        {
            tracing::warn!(error = %e, "Failed to answer review callback");
        }

        answer
    }

    async fn apply(&self, callback: &ReviewCallback, decision: ReviewDecision) -> String {
        let outcome = self
            .lifecycle
            .resolve(&decision.prediction_id, decision.result, ResolutionSource::Bot)
            .await;

        match outcome {
            Ok(ResolveOutcome::Resolved(prediction)) => {
                self.close_prompt(callback, &prediction, decision.result).await;
                format!("Confirmed: {}", decision.result.label())
            }
            Ok(ResolveOutcome::AlreadyResolved(_)) => "Already reviewed!".to_string(),
            Ok(ResolveOutcome::NotFound) => "Prediction not found".to_string(),
            Err(e) => {
                tracing::error!(
                    prediction_id = %decision.prediction_id,
                    error = %e,
                    "Review resolution failed"
                );
                "Something went wrong, please try again".to_string()
            }
        }
    }

    async fn close_prompt(&self, callback: &ReviewCallback, prediction: &Prediction, result: ResolutionResult) {
        let Some(message) = callback.message.or(prediction.review_message) else {
            return;
        };
        let original = callback
            .caption
            .clone()
            .unwrap_or_else(|| templates::review_caption(prediction));

        if let Err(e) = self.notifier.close_prompt(message, &original, result).await {
            tracing::warn!(
                prediction_id = %prediction.id,
                error = %e,
                "Failed to update review prompt"
            );
        }
    }
}
