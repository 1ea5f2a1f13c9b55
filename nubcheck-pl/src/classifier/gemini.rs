//! Gemini `generateContent` client

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Classifier, ClassifierError};
use nubcheck_common::config::ClassifierConfig;

const USER_AGENT: &str = concat!("nubcheck-pl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Vision classifier backed by the Gemini REST API
pub struct GeminiClassifier {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_base: String,
}

impl GeminiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(
        &self,
        image: &[u8],
        content_type: &str,
        prompt: &str,
    ) -> Result<String, ClassifierError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClassifierError::NotConfigured("classifier.api_key".to_string()))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    {
                        "inline_data": {
                            "mime_type": content_type,
                            "data": base64::engine::general_purpose::STANDARD.encode(image),
                        }
                    }
                ]
            }]
        });

        tracing::debug!(model = %self.model, image_bytes = image.len(), "Calling classifier");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), error_text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        // An empty reply still parses (to UNCLEAR); keep it rather than erroring
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let classifier = GeminiClassifier::new(&ClassifierConfig::default()).unwrap();
        let err = classifier
            .classify(b"img", "image/jpeg", "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::NotConfigured(_)));
    }

    #[test]
    fn test_response_text_parts_are_joined() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "BOY\n" }, { "text": "82\nClear nub" }] }
            }]
        }))
        .unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(text, "BOY\n82\nClear nub");
    }
}
