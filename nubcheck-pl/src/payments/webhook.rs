//! Payment webhook verification and decoding
//!
//! The signature is checked against the raw body before anything is parsed.

use nubcheck_common::signing::{verify_webhook_signature, SignatureError};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook secret not configured")]
    NotConfigured,

    #[error("Signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("Malformed event: {0}")]
    Malformed(String),
}

/// Provider events the reconciler acts on
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    CheckoutCompleted {
        session_id: String,
        payment_intent: Option<String>,
    },
    PaymentSucceeded {
        payment_intent: String,
    },
    PaymentFailed {
        payment_intent: String,
        amount: i64,
        customer_email: Option<String>,
        failure_message: Option<String>,
    },
    ChargeRefunded {
        charge_id: String,
        /// Absent on malformed or legacy charges
        payment_intent: Option<String>,
        amount_refunded: i64,
    },
    /// Acknowledged and ignored
    Unknown,
}

/// Verified delivery
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub event_id: String,
    pub event_type: String,
    pub event: PaymentEvent,
}

/// Verify the signature header and decode the event
pub fn verify_delivery(
    body: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
    tolerance_secs: i64,
    now: i64,
) -> Result<WebhookDelivery, WebhookError> {
    let secret = secret.ok_or(WebhookError::NotConfigured)?;
    let header = signature_header.ok_or(SignatureError::Missing)?;
    verify_webhook_signature(body, header, secret, tolerance_secs, now)?;
    parse_delivery(body)
}

fn id_of(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Object(object)) => object.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn required_str(object: &Value, field: &str) -> Result<String, WebhookError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WebhookError::Malformed(format!("missing {}", field)))
}

/// Decode an already-verified event body
pub fn parse_delivery(body: &[u8]) -> Result<WebhookDelivery, WebhookError> {
    let envelope: Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let event_id = required_str(&envelope, "id")?;
    let event_type = required_str(&envelope, "type")?;
    let object = envelope
        .pointer("/data/object")
        .ok_or_else(|| WebhookError::Malformed("missing data.object".to_string()))?;

    let event = match event_type.as_str() {
        "checkout.session.completed" => PaymentEvent::CheckoutCompleted {
            session_id: required_str(object, "id")?,
            payment_intent: id_of(object.get("payment_intent")),
        },
        "payment_intent.succeeded" => PaymentEvent::PaymentSucceeded {
            payment_intent: required_str(object, "id")?,
        },
        "payment_intent.payment_failed" => PaymentEvent::PaymentFailed {
            payment_intent: required_str(object, "id")?,
            amount: object.get("amount").and_then(Value::as_i64).unwrap_or(0),
            customer_email: object
                .get("receipt_email")
                .and_then(Value::as_str)
                .map(str::to_string),
            failure_message: object
                .pointer("/last_payment_error/message")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "charge.refunded" => PaymentEvent::ChargeRefunded {
            charge_id: required_str(object, "id")?,
            payment_intent: id_of(object.get("payment_intent")),
            amount_refunded: object
                .get("amount_refunded")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        },
        _ => PaymentEvent::Unknown,
    };

    Ok(WebhookDelivery {
        event_id,
        event_type,
        event,
    })
}
