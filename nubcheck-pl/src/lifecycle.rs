//! Prediction lifecycle orchestrator
//!
//! Drives a prediction through ingest, classification and resolution.
//! Every state change goes through [`Store`]; the side effects each change
//! requires are outbox jobs picked up by [`crate::jobs::JobDispatcher`].
//! Callers wake the dispatcher after a transition so jobs run promptly.

use chrono::Utc;
use nubcheck_common::config::AppConfig;
use nubcheck_common::{Prediction, ResolutionResult, Verdict};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::classifier::{Classification, ClassifierError, ClassifierGateway};
use crate::images::{validate_upload, ImageStore, ImageStoreError};
use crate::notify::templates;
use crate::payments::{PaymentError, PaymentProvider};
use crate::store::{InsertOutcome, JobPayload, NewPrediction, ResolutionSource, ResolveOutcome, Store};

/// Lifecycle failures surfaced to callers
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Payment not completed")]
    PaymentNotCompleted,

    #[error("No customer email for session {0}")]
    MissingEmail(String),

    #[error("Prediction not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Image(#[from] ImageStoreError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] nubcheck_common::Error),
}

/// Uploaded scan plus proof of payment
#[derive(Debug, Clone)]
pub struct Upload {
    pub session_id: String,
    pub image: Vec<u8>,
    pub content_type: String,
    /// Used only when the checkout session carries no email
    pub email_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    pub prediction: Prediction,
    pub classification: Classification,
    pub auto_resolved: bool,
}

/// Map a classifier verdict to a result eligible for automatic resolution
fn auto_result(verdict: Verdict) -> Option<ResolutionResult> {
    match verdict {
        Verdict::Boy => Some(ResolutionResult::Boy),
        Verdict::Girl => Some(ResolutionResult::Girl),
        Verdict::Unclear | Verdict::Invalid => None,
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Store,
    gateway: ClassifierGateway,
    provider: Arc<dyn PaymentProvider>,
    images: Arc<dyn ImageStore>,
    config: Arc<AppConfig>,
    wake: Arc<Notify>,
}

impl Lifecycle {
    pub fn new(
        store: Store,
        gateway: ClassifierGateway,
        provider: Arc<dyn PaymentProvider>,
        images: Arc<dyn ImageStore>,
        config: Arc<AppConfig>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            gateway,
            provider,
            images,
            config,
            wake,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a pending prediction from a paid checkout session
    ///
    /// A session that was already ingested returns its existing prediction.
    /// Classification is enqueued, never awaited: the customer has paid, so
    /// the response must not depend on the classifier.
    pub async fn ingest(&self, upload: Upload) -> Result<InsertOutcome, LifecycleError> {
        validate_upload(
            &upload.content_type,
            upload.image.len(),
            self.config.images.max_bytes,
        )?;

        if let Some(existing) = self.store.find_by_session(&upload.session_id).await? {
            tracing::info!(
                session_id = %upload.session_id,
                prediction_id = %existing.id,
                "Session already ingested"
            );
            return Ok(InsertOutcome::Existing(existing));
        }

        let session = match self.provider.retrieve_session(&upload.session_id).await {
            Ok(session) => session,
            Err(PaymentError::NotFound(_)) => {
                return Err(LifecycleError::InvalidSession(upload.session_id));
            }
            Err(e) => return Err(e.into()),
        };

        if !session.is_paid() {
            tracing::warn!(
                session_id = %session.id,
                payment_status = %session.payment_status,
                "Upload rejected: payment not completed"
            );
            return Err(LifecycleError::PaymentNotCompleted);
        }

        let customer_email = session
            .customer_email
            .clone()
            .or(upload.email_hint)
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| LifecycleError::MissingEmail(session.id.clone()))?;

        let image_ref = self.images.store(&upload.image, &upload.content_type).await?;

        let id = Uuid::new_v4().to_string();
        let alert = JobPayload::alert(
            format!("new_submission:{}", id),
            templates::new_submission_alert(
                &id,
                &customer_email,
                session.amount_total,
                session.referral_code.as_deref(),
            ),
        );
        let new = NewPrediction {
            id,
            checkout_session_id: session.id,
            payment_intent_id: session.payment_intent,
            amount_paid: session.amount_total,
            customer_email,
            image_ref,
            referral_code: session.referral_code,
        };

        let outcome = self.store.insert_pending(&new, &[alert], Utc::now()).await?;
        match &outcome {
            InsertOutcome::Inserted(p) => {
                tracing::info!(
                    prediction_id = %p.id,
                    session_id = %p.checkout_session_id,
                    referral = p.referral_code.as_deref().unwrap_or("-"),
                    "Prediction created"
                );
                self.wake.notify_one();
            }
            InsertOutcome::Existing(p) => {
                // Lost a race with a concurrent upload for the same session
                tracing::warn!(
                    prediction_id = %p.id,
                    orphaned_image = %new.image_ref,
                    "Concurrent upload for ingested session"
                );
            }
        }

        Ok(outcome)
    }

    /// Run the classifier for a prediction and persist its verdict
    ///
    /// Recording the verdict enqueues the review prompt. With
    /// `review.auto_resolve_confidence` set, a confident boy/girl verdict is
    /// also resolved through the same guarded transition as a human decision.
    pub async fn classify(&self, id: &str) -> Result<ClassifyOutcome, LifecycleError> {
        let prediction = self.require(id).await?;

        let reply = match self.gateway.classify_image(&prediction.image_ref).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(prediction_id = %id, error = %e, "Classification failed");
                return Err(e.into());
            }
        };
        let classification = reply.classification;

        let prediction = self
            .store
            .record_classification(
                id,
                classification.verdict,
                classification.confidence,
                &reply.raw_response,
            )
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        tracing::info!(
            prediction_id = %id,
            verdict = %classification.verdict,
            confidence = classification.confidence,
            "Classification recorded"
        );

        let mut auto_resolved = false;
        if let (Some(threshold), Some(result)) = (
            self.config.review.auto_resolve_confidence,
            auto_result(classification.verdict),
        ) {
            if classification.confidence >= threshold {
                auto_resolved = matches!(
                    self.resolve(id, result, ResolutionSource::Auto).await?,
                    ResolveOutcome::Resolved(_)
                );
            }
        }

        self.wake.notify_one();
        Ok(ClassifyOutcome {
            prediction,
            classification,
            auto_resolved,
        })
    }

    /// Apply a resolution from any channel
    ///
    /// Exactly one call per prediction returns `Resolved`; every later call
    /// gets `AlreadyResolved` and changes nothing.
    pub async fn resolve(
        &self,
        id: &str,
        result: ResolutionResult,
        source: ResolutionSource,
    ) -> Result<ResolveOutcome, LifecycleError> {
        let outcome = self.store.resolve(id, result, source, Utc::now()).await?;

        match &outcome {
            ResolveOutcome::Resolved(p) => {
                tracing::info!(
                    prediction_id = %id,
                    result = %result,
                    source = %source,
                    status = %p.status,
                    "Prediction resolved"
                );
                self.wake.notify_one();
            }
            ResolveOutcome::AlreadyResolved(p) => {
                tracing::info!(
                    prediction_id = %id,
                    attempted = %result,
                    existing = p.final_result.map(|r| r.as_str()).unwrap_or("-"),
                    source = %source,
                    "Resolution ignored: already resolved"
                );
            }
            ResolveOutcome::NotFound => {
                tracing::warn!(prediction_id = %id, source = %source, "Resolution for unknown prediction");
            }
        }

        Ok(outcome)
    }

    pub async fn require(&self, id: &str) -> Result<Prediction, LifecycleError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Re-read a prediction once a second until it is resolved or `wait` elapses
    pub async fn wait_for_result(&self, id: &str, wait: Duration) -> Result<Prediction, LifecycleError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let prediction = self.require(id).await?;
            let now = tokio::time::Instant::now();
            if prediction.is_resolved() || now >= deadline {
                return Ok(prediction);
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    /// Record a customer refund request and alert the operators
    ///
    /// Money only moves when an operator refunds through the provider; the
    /// charge-refunded event then updates the status.
    pub async fn request_refund(&self, id: &str, reason: Option<&str>) -> Result<Prediction, LifecycleError> {
        let prediction = self.require(id).await?;
        let alert = JobPayload::alert(
            format!("refund_requested:{}", id),
            templates::refund_requested_alert(&prediction, reason),
        );

        let updated = self
            .store
            .request_refund(id, &alert, Utc::now())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        tracing::info!(prediction_id = %id, "Refund requested by customer");
        self.wake.notify_one();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_boy_and_girl_auto_resolve() {
        assert_eq!(auto_result(Verdict::Boy), Some(ResolutionResult::Boy));
        assert_eq!(auto_result(Verdict::Girl), Some(ResolutionResult::Girl));
        assert_eq!(auto_result(Verdict::Unclear), None);
        assert_eq!(auto_result(Verdict::Invalid), None);
    }
}
