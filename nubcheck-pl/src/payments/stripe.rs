//! Stripe REST client (checkout session lookup and refunds)

use async_trait::async_trait;
use nubcheck_common::config::PaymentsConfig;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::{CheckoutSession, PaymentError, PaymentProvider};

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    payment_status: String,
    /// Either an id or an expanded object
    payment_intent: Option<Value>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    metadata: Option<HashMap<String, String>>,
    amount_total: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl From<SessionResponse> for CheckoutSession {
    fn from(session: SessionResponse) -> Self {
        let payment_intent = match session.payment_intent {
            Some(Value::String(id)) => Some(id),
            Some(Value::Object(object)) => object
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        let customer_email = session
            .customer_details
            .and_then(|details| details.email)
            .or(session.customer_email);
        let referral_code = session
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("referral_code"))
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        CheckoutSession {
            id: session.id,
            payment_status: session.payment_status,
            payment_intent,
            customer_email,
            referral_code,
            amount_total: session.amount_total,
        }
    }
}

pub struct StripeClient {
    http_client: reqwest::Client,
    secret_key: Option<String>,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &PaymentsConfig) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            secret_key: config.stripe_secret_key.clone(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn secret_key(&self) -> Result<&str, PaymentError> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| PaymentError::NotConfigured("payments.stripe_secret_key".to_string()))
    }
}

async fn error_from(response: reqwest::Response) -> PaymentError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or(text);
    if status == 404 {
        PaymentError::NotFound(message)
    } else {
        PaymentError::Api(status, message)
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .http_client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(self.secret_key()?)
            .send()
            .await
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;
        Ok(session.into())
    }

    async fn refund(&self, payment_intent_id: &str, idempotency_key: &str) -> Result<(), PaymentError> {
        let response = self
            .http_client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(self.secret_key()?)
            .header("Idempotency-Key", idempotency_key)
            .form(&[("payment_intent", payment_intent_id)])
            .send()
            .await
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        tracing::info!(payment_intent = %payment_intent_id, "Refund accepted by provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_mapping_prefers_customer_details() {
        let raw: SessionResponse = serde_json::from_value(json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": { "id": "pi_1", "object": "payment_intent" },
            "customer_email": "old@example.com",
            "customer_details": { "email": "parent@example.com" },
            "metadata": { "referral_code": " MUMS10 " },
            "amount_total": 1999
        }))
        .unwrap();

        let session: CheckoutSession = raw.into();
        assert!(session.is_paid());
        assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(session.customer_email.as_deref(), Some("parent@example.com"));
        assert_eq!(session.referral_code.as_deref(), Some("MUMS10"));
        assert_eq!(session.amount_total, Some(1999));
    }

    #[test]
    fn test_session_mapping_minimal() {
        let raw: SessionResponse = serde_json::from_value(json!({
            "id": "cs_test_2",
            "payment_status": "unpaid",
            "payment_intent": null,
            "metadata": { "referral_code": "" }
        }))
        .unwrap();

        let session: CheckoutSession = raw.into();
        assert!(!session.is_paid());
        assert!(session.payment_intent.is_none());
        assert!(session.customer_email.is_none());
        assert!(session.referral_code.is_none());
    }
}
