//! Classifier gateway
//!
//! Wraps an untrusted free-text vision model. The gateway owns the prompt and
//! the parsing; the model itself is behind the [`Classifier`] trait.

pub mod gemini;
pub mod parser;
pub mod prompt;

pub use gemini::GeminiClassifier;
pub use parser::{parse_reply, Classification};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::images::{ImageStore, ImageStoreError};

/// Classifier client errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Image unavailable: {0}")]
    Image(#[from] ImageStoreError),
}

/// External vision-classification capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Run `prompt` against the image and return the model's raw text
    async fn classify(
        &self,
        image: &[u8],
        content_type: &str,
        prompt: &str,
    ) -> Result<String, ClassifierError>;
}

/// Parsed verdict plus the raw reply kept for audit
#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub classification: Classification,
    pub raw_response: String,
}

/// Loads the scan, asks the classifier and parses the answer
#[derive(Clone)]
pub struct ClassifierGateway {
    classifier: Arc<dyn Classifier>,
    images: Arc<dyn ImageStore>,
}

impl ClassifierGateway {
    pub fn new(classifier: Arc<dyn Classifier>, images: Arc<dyn ImageStore>) -> Self {
        Self { classifier, images }
    }

    /// Classify the image stored under `image_ref`
    ///
    /// Only transport failures are errors; any reply text parses to a verdict.
    pub async fn classify_image(&self, image_ref: &str) -> Result<GatewayResult, ClassifierError> {
        let image = self.images.load(image_ref).await?;
        let raw_response = self
            .classifier
            .classify(&image.bytes, &image.content_type, prompt::CLASSIFICATION_PROMPT)
            .await?;

        let classification = parse_reply(&raw_response);
        tracing::debug!(
            image_ref = %image_ref,
            verdict = %classification.verdict,
            confidence = classification.confidence,
            "Classifier reply parsed"
        );

        Ok(GatewayResult {
            classification,
            raw_response,
        })
    }
}
