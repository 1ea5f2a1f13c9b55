//! Payment reconciler
//!
//! Keeps prediction status consistent with money movement:
//! - [`reconciler::Reconciler::execute_refund`] runs refund jobs
//! - [`reconciler::Reconciler::apply_event`] applies verified provider events
//! - [`webhook`] verifies and decodes provider deliveries

pub mod reconciler;
pub mod stripe;
pub mod webhook;

pub use reconciler::{EventOutcome, ReconcileError, Reconciler, RefundOutcome};
pub use stripe::StripeClient;
pub use webhook::{PaymentEvent, WebhookDelivery, WebhookError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment provider errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// The parts of a checkout session ingest depends on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: String,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub referral_code: Option<String>,
    /// Minor units
    pub amount_total: Option<i64>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError>;

    /// Refund a payment intent in full
    ///
    /// `idempotency_key` is stable per prediction, so the provider refunds at
    /// most once however often the job runs.
    async fn refund(&self, payment_intent_id: &str, idempotency_key: &str) -> Result<(), PaymentError>;
}
