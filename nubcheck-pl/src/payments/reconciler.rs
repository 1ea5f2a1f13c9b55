//! Refund execution and provider event application

use chrono::{DateTime, Utc};
use nubcheck_common::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;

use super::webhook::PaymentEvent;
use super::{PaymentError, PaymentProvider};
use crate::notify::templates;
use crate::store::{JobPayload, Store};

#[derive(Debug, ThisError)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] Error),

    #[error("Refund failed: {0}")]
    Provider(#[from] PaymentError),
}

/// What a refund job did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Provider accepted the refund
    Refunded,
    /// No payment intent on record; status still moves to refunded
    NoPaymentIntent,
    /// `refund_processed_at` was already set
    AlreadyProcessed,
}

/// What applying a provider event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Number of prediction rows the event changed (0 on replay)
    Applied { changed: u64 },
    /// Event refers to nothing we know about
    Unmatched,
    /// Event type we do not act on
    Ignored,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Store,
    provider: Arc<dyn PaymentProvider>,
}

impl Reconciler {
    pub fn new(store: Store, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { store, provider }
    }

    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.provider
    }

    /// Refund a prediction in full and record that it was processed
    ///
    /// The provider call carries `refund-{id}` as its idempotency key, so a
    /// retried job cannot refund twice.
    pub async fn execute_refund(&self, prediction_id: &str, now: DateTime<Utc>) -> Result<RefundOutcome, ReconcileError> {
        let prediction = self.store.require(prediction_id).await?;
        if prediction.refund_processed_at.is_some() {
            return Ok(RefundOutcome::AlreadyProcessed);
        }

        let outcome = match prediction.payment_intent_id.as_deref() {
            Some(payment_intent) => {
                let key = format!("refund-{}", prediction.id);
                self.provider.refund(payment_intent, &key).await?;
                RefundOutcome::Refunded
            }
            None => {
                tracing::warn!(
                    prediction_id = %prediction.id,
                    "No payment intent on record, marking refunded without provider call"
                );
                RefundOutcome::NoPaymentIntent
            }
        };

        if !self.store.mark_refund_processed(&prediction.id, now).await? {
            tracing::debug!(prediction_id = %prediction.id, "Refund already recorded");
        }

        tracing::info!(prediction_id = %prediction.id, outcome = ?outcome, "Refund executed");
        Ok(outcome)
    }

    /// Apply a verified provider event
    ///
    /// Every mutation is idempotent, so replays and out-of-order deliveries
    /// are safe to apply again.
    pub async fn apply_event(&self, event: &PaymentEvent, now: DateTime<Utc>) -> Result<EventOutcome, Error> {
        let outcome = match event {
            PaymentEvent::CheckoutCompleted {
                session_id,
                payment_intent,
            } => {
                if let Some(payment_intent) = payment_intent {
                    self.store.attach_payment_intent(session_id, payment_intent).await?;
                }
                let changed = self.store.confirm_payment_by_session(session_id).await?;
                if changed == 0 && self.store.find_by_session(session_id).await?.is_none() {
                    // Webhook may arrive before the upload; the session lookup
                    // at ingest already proved payment
                    tracing::info!(session_id = %session_id, "Checkout completed for unknown session");
                    EventOutcome::Unmatched
                } else {
                    EventOutcome::Applied { changed }
                }
            }
            PaymentEvent::PaymentSucceeded { payment_intent } => {
                let changed = self.store.confirm_payment_by_intent(payment_intent).await?;
                if changed == 0 && self.store.find_by_payment_intent(payment_intent).await?.is_empty() {
                    EventOutcome::Unmatched
                } else {
                    EventOutcome::Applied { changed }
                }
            }
            PaymentEvent::PaymentFailed {
                payment_intent,
                amount,
                customer_email,
                failure_message,
            } => {
                let alert = JobPayload::alert(
                    format!("payment_failed:{}", payment_intent),
                    templates::payment_failed_alert(
                        payment_intent,
                        customer_email.as_deref(),
                        *amount,
                        failure_message.as_deref(),
                    ),
                );
                let changed = self.store.mark_payment_failed(payment_intent, &alert).await?;
                tracing::warn!(
                    payment_intent = %payment_intent,
                    changed,
                    failure = failure_message.as_deref().unwrap_or("unknown"),
                    "Payment failed"
                );
                EventOutcome::Applied { changed }
            }
            PaymentEvent::ChargeRefunded {
                charge_id,
                payment_intent,
                amount_refunded,
            } => match payment_intent {
                Some(payment_intent) => {
                    let alert = JobPayload::alert(
                        format!("refund_processed:{}", payment_intent),
                        templates::refund_processed_alert(payment_intent, *amount_refunded),
                    );
                    let changed = self
                        .store
                        .mark_refunded_by_intent(payment_intent, &alert, now)
                        .await?;
                    if changed == 0 && self.store.find_by_payment_intent(payment_intent).await?.is_empty() {
                        tracing::warn!(
                            charge_id = %charge_id,
                            payment_intent = %payment_intent,
                            "Charge refunded for unknown payment intent"
                        );
                        EventOutcome::Unmatched
                    } else {
                        EventOutcome::Applied { changed }
                    }
                }
                None => {
                    tracing::warn!(charge_id = %charge_id, "Charge refunded without payment intent");
                    EventOutcome::Unmatched
                }
            },
            PaymentEvent::Unknown => EventOutcome::Ignored,
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::CheckoutSession;
    use crate::store::{test_store, NewPrediction};
    use async_trait::async_trait;
    use nubcheck_common::PredictionStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        refunds: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentProvider for RecordingProvider {
        async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
            Err(PaymentError::NotFound(session_id.to_string()))
        }

        async fn refund(&self, payment_intent_id: &str, idempotency_key: &str) -> Result<(), PaymentError> {
            if self.fail {
                return Err(PaymentError::Api(500, "boom".into()));
            }
            self.refunds
                .lock()
                .unwrap()
                .push((payment_intent_id.to_string(), idempotency_key.to_string()));
            Ok(())
        }
    }

    async fn seed(store: &Store, id: &str, payment_intent: Option<&str>) {
        store
            .insert_pending(
                &NewPrediction {
                    id: id.to_string(),
                    checkout_session_id: format!("cs_{}", id),
                    payment_intent_id: payment_intent.map(str::to_string),
                    amount_paid: Some(1999),
                    customer_email: "parent@example.com".to_string(),
                    image_ref: format!("ultrasounds/{}.jpg", id),
                    referral_code: None,
                },
                &[],
                Utc::now(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refund_uses_stable_key_and_records_once() {
        let (store, _dir) = test_store().await;
        seed(&store, "p1", Some("pi_1")).await;
        let provider = Arc::new(RecordingProvider::default());
        let reconciler = Reconciler::new(store.clone(), provider.clone());

        let first = reconciler.execute_refund("p1", Utc::now()).await.unwrap();
        let second = reconciler.execute_refund("p1", Utc::now()).await.unwrap();

        assert_eq!(first, RefundOutcome::Refunded);
        assert_eq!(second, RefundOutcome::AlreadyProcessed);
        assert_eq!(
            *provider.refunds.lock().unwrap(),
            vec![("pi_1".to_string(), "refund-p1".to_string())]
        );
        let p = store.require("p1").await.unwrap();
        assert_eq!(p.status, PredictionStatus::Refunded);
        assert!(p.refund_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_refund_without_intent_still_marks_refunded() {
        let (store, _dir) = test_store().await;
        seed(&store, "p2", None).await;
        let provider = Arc::new(RecordingProvider::default());
        let reconciler = Reconciler::new(store.clone(), provider.clone());

        let outcome = reconciler.execute_refund("p2", Utc::now()).await.unwrap();
        assert_eq!(outcome, RefundOutcome::NoPaymentIntent);
        assert!(provider.refunds.lock().unwrap().is_empty());
        assert_eq!(store.require("p2").await.unwrap().status, PredictionStatus::Refunded);
    }

    #[tokio::test]
    async fn test_failed_refund_leaves_row_untouched() {
        let (store, _dir) = test_store().await;
        seed(&store, "p3", Some("pi_3")).await;
        let provider = Arc::new(RecordingProvider {
            fail: true,
            ..Default::default()
        });
        let reconciler = Reconciler::new(store.clone(), provider);

        assert!(matches!(
            reconciler.execute_refund("p3", Utc::now()).await,
            Err(ReconcileError::Provider(_))
        ));
        assert!(store.require("p3").await.unwrap().refund_processed_at.is_none());
    }

    #[tokio::test]
    async fn test_checkout_completed_replay_is_idempotent() {
        let (store, _dir) = test_store().await;
        seed(&store, "p4", None).await;
        let reconciler = Reconciler::new(store.clone(), Arc::new(RecordingProvider::default()));
        let event = PaymentEvent::CheckoutCompleted {
            session_id: "cs_p4".into(),
            payment_intent: Some("pi_4".into()),
        };

        let first = reconciler.apply_event(&event, Utc::now()).await.unwrap();
        let second = reconciler.apply_event(&event, Utc::now()).await.unwrap();

        assert_eq!(first, EventOutcome::Applied { changed: 1 });
        assert_eq!(second, EventOutcome::Applied { changed: 0 });
        let p = store.require("p4").await.unwrap();
        assert!(p.payment_confirmed_via_webhook);
        assert_eq!(p.payment_intent_id.as_deref(), Some("pi_4"));
    }

    #[tokio::test]
    async fn test_refund_event_for_unknown_intent_is_unmatched() {
        let (store, _dir) = test_store().await;
        let reconciler = Reconciler::new(store.clone(), Arc::new(RecordingProvider::default()));

        let outcome = reconciler
            .apply_event(
                &PaymentEvent::ChargeRefunded {
                    charge_id: "ch_1".into(),
                    payment_intent: Some("pi_missing".into()),
                    amount_refunded: 1999,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Unmatched);
        // The alert still goes out
        assert_eq!(store.count_open_jobs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_payment_failed_only_moves_pending() {
        let (store, _dir) = test_store().await;
        seed(&store, "p5", Some("pi_5")).await;
        let reconciler = Reconciler::new(store.clone(), Arc::new(RecordingProvider::default()));
        let event = PaymentEvent::PaymentFailed {
            payment_intent: "pi_5".into(),
            amount: 1999,
            customer_email: None,
            failure_message: Some("Card declined".into()),
        };

        assert_eq!(
            reconciler.apply_event(&event, Utc::now()).await.unwrap(),
            EventOutcome::Applied { changed: 1 }
        );
        assert_eq!(
            store.require("p5").await.unwrap().status,
            PredictionStatus::PaymentFailed
        );
        assert_eq!(
            reconciler.apply_event(&event, Utc::now()).await.unwrap(),
            EventOutcome::Applied { changed: 0 }
        );
    }
}
