//! Notification dispatcher
//!
//! Outbound messages to customers (email) and to reviewers (bot chat).
//! Called only from outbox jobs, after the state change that requires the
//! message is committed. A failed send is returned to the job dispatcher,
//! which retries and eventually escalates; it never rolls state back.

pub mod resend;
pub mod telegram;
pub mod templates;

pub use resend::ResendClient;
pub use telegram::TelegramBot;

use async_trait::async_trait;
use nubcheck_common::{Prediction, ResolutionResult, ReviewMessageRef};
use std::sync::Arc;
use thiserror::Error;

use crate::images::ImageStore;

/// Delivery errors for email and bot channels
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// Inline button on a review prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewAction {
    pub label: String,
    /// Delivered back as `"<result>:<prediction id>"`
    pub callback_data: String,
}

/// Human review channel (messaging bot)
#[async_trait]
pub trait ReviewChannel: Send + Sync {
    async fn send_photo_with_actions(
        &self,
        photo_url: &str,
        caption: &str,
        actions: &[ReviewAction],
    ) -> Result<ReviewMessageRef, NotifyError>;

    /// Replace the caption and remove every action button
    async fn edit_message(&self, message: ReviewMessageRef, caption: &str) -> Result<(), NotifyError>;

    /// Acknowledge a button press with a short toast
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError>;

    /// Plain operational message to the review chat
    async fn send_text(&self, text: &str) -> Result<(), NotifyError>;
}

/// Renders and sends every outbound message the lifecycle produces
#[derive(Clone)]
pub struct Notifier {
    email: Arc<dyn EmailSender>,
    review: Arc<dyn ReviewChannel>,
    images: Arc<dyn ImageStore>,
    public_base_url: String,
}

impl Notifier {
    pub fn new(
        email: Arc<dyn EmailSender>,
        review: Arc<dyn ReviewChannel>,
        images: Arc<dyn ImageStore>,
        public_base_url: &str,
    ) -> Self {
        Self {
            email,
            review,
            images,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn review_channel(&self) -> &Arc<dyn ReviewChannel> {
        &self.review
    }

    /// Boy/girl outcome email; confidence falls back to the template default
    pub async fn send_result(&self, prediction: &Prediction, result: ResolutionResult) -> Result<(), NotifyError> {
        let message = templates::result_email(prediction, result, &self.public_base_url);
        self.email.send(&message).await?;
        tracing::info!(
            prediction_id = %prediction.id,
            result = %result,
            "Result email sent"
        );
        Ok(())
    }

    /// Unclear outcome email (refund issued)
    pub async fn send_unclear(&self, prediction: &Prediction) -> Result<(), NotifyError> {
        let message = templates::unclear_email(prediction);
        self.email.send(&message).await?;
        tracing::info!(prediction_id = %prediction.id, "Unclear/refund email sent");
        Ok(())
    }

    /// Post the scan to the review chat
    ///
    /// An unresolved prediction gets the three action buttons. One that is
    /// already resolved (auto-resolve, or an admin beat the prompt) is posted
    /// for the record without buttons.
    pub async fn send_review_prompt(&self, prediction: &Prediction) -> Result<ReviewMessageRef, NotifyError> {
        let photo_url = self.images.resolve_read_url(&prediction.image_ref);
        let caption = templates::review_caption(prediction);

        let (caption, actions) = match prediction.final_result {
            Some(result) => (templates::reviewed_caption(&caption, result), Vec::new()),
            None => (caption, templates::review_actions(&prediction.id)),
        };

        self.review
            .send_photo_with_actions(&photo_url, &caption, &actions)
            .await
    }

    /// Annotate a prompt with its outcome and remove its buttons
    pub async fn close_prompt(
        &self,
        message: ReviewMessageRef,
        original_caption: &str,
        result: ResolutionResult,
    ) -> Result<(), NotifyError> {
        let caption = templates::reviewed_caption(original_caption, result);
        self.review.edit_message(message, &caption).await
    }

    pub async fn alert(&self, text: &str) -> Result<(), NotifyError> {
        self.review.send_text(text).await
    }
}
