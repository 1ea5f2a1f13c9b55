//! Telegram Bot API client for review prompts and operational alerts

use async_trait::async_trait;
use nubcheck_common::config::ReviewConfig;
use nubcheck_common::ReviewMessageRef;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{NotifyError, ReviewAction, ReviewChannel};

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramBot {
    http_client: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
}

impl TelegramBot {
    pub fn new(config: &ReviewConfig) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
            api_base: config.telegram_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn chat_id(&self) -> Result<&str, NotifyError> {
        self.chat_id
            .as_deref()
            .ok_or_else(|| NotifyError::NotConfigured("review.telegram_chat_id".to_string()))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, NotifyError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or_else(|| NotifyError::NotConfigured("review.telegram_bot_token".to_string()))?;

        let response = self
            .http_client
            .post(format!("{}/bot{}/{}", self.api_base, token, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        let envelope: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| NotifyError::Parse(format!("{} response: {}", method, e)))?;

        if !envelope.ok {
            return Err(NotifyError::Api(
                status.as_u16(),
                envelope
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            ));
        }

        envelope
            .result
            .ok_or_else(|| NotifyError::Parse(format!("{} returned no result", method)))
    }
}

fn inline_keyboard(actions: &[ReviewAction]) -> Value {
    let row: Vec<Value> = actions
        .iter()
        .map(|action| json!({ "text": action.label, "callback_data": action.callback_data }))
        .collect();
    if row.is_empty() {
        json!({ "inline_keyboard": [] })
    } else {
        json!({ "inline_keyboard": [row] })
    }
}

#[async_trait]
impl ReviewChannel for TelegramBot {
    async fn send_photo_with_actions(
        &self,
        photo_url: &str,
        caption: &str,
        actions: &[ReviewAction],
    ) -> Result<ReviewMessageRef, NotifyError> {
        let sent: SentMessage = self
            .call(
                "sendPhoto",
                json!({
                    "chat_id": self.chat_id()?,
                    "photo": photo_url,
                    "caption": caption,
                    "reply_markup": inline_keyboard(actions),
                }),
            )
            .await?;

        Ok(ReviewMessageRef {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit_message(&self, message: ReviewMessageRef, caption: &str) -> Result<(), NotifyError> {
        // Returns the edited message, or `true` for inline messages
        let _: Value = self
            .call(
                "editMessageCaption",
                json!({
                    "chat_id": message.chat_id,
                    "message_id": message.message_id,
                    "caption": caption,
                    "reply_markup": inline_keyboard(&[]),
                }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError> {
        let _: Value = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        let _: Value = self
            .call(
                "sendMessage",
                json!({ "chat_id": self.chat_id()?, "text": text }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_keyboard_shape() {
        let keyboard = inline_keyboard(&[ReviewAction {
            label: "👦 Boy".into(),
            callback_data: "boy:p1".into(),
        }]);
        assert_eq!(keyboard["inline_keyboard"][0][0]["callback_data"], "boy:p1");
        assert_eq!(inline_keyboard(&[])["inline_keyboard"], json!([]));
    }

    #[tokio::test]
    async fn test_unconfigured_bot_fails_closed() {
        let bot = TelegramBot::new(&ReviewConfig::default()).unwrap();
        assert!(matches!(
            bot.send_text("hi").await,
            Err(NotifyError::NotConfigured(_))
        ));
    }
}
