//! Resend email client

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{EmailMessage, EmailSender, NotifyError};
use nubcheck_common::config::EmailConfig;

pub struct ResendClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    from: String,
    api_base: String,
}

impl ResendClient {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: config.resend_api_key.clone(),
            from: config.from.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmailSender for ResendClient {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| NotifyError::NotConfigured("email.resend_api_key".to_string()))?;

        let response = self
            .http_client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
                "text": message.text,
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api(status.as_u16(), error_text));
        }

        Ok(())
    }
}
