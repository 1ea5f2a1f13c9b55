//! Domain models shared by nubcheck services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Classifier verdict before human confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Boy,
    Girl,
    Unclear,
    Invalid,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Boy => "boy",
            Verdict::Girl => "girl",
            Verdict::Unclear => "unclear",
            Verdict::Invalid => "invalid",
        }
    }

    /// Upper-case token as it appears in classifier output and review captions
    pub fn token(&self) -> &'static str {
        match self {
            Verdict::Boy => "BOY",
            Verdict::Girl => "GIRL",
            Verdict::Unclear => "UNCLEAR",
            Verdict::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = Error;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boy" => Ok(Verdict::Boy),
            "girl" => Ok(Verdict::Girl),
            "unclear" => Ok(Verdict::Unclear),
            "invalid" => Ok(Verdict::Invalid),
            other => Err(Error::InvalidInput(format!("Unknown verdict: {}", other))),
        }
    }
}

/// Authoritative human decision for a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionResult {
    Boy,
    Girl,
    Unclear,
}

impl ResolutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionResult::Boy => "boy",
            ResolutionResult::Girl => "girl",
            ResolutionResult::Unclear => "unclear",
        }
    }

    /// Label shown on review prompts once a decision is recorded
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionResult::Boy => "👦 Boy",
            ResolutionResult::Girl => "👧 Girl",
            ResolutionResult::Unclear => "❓ Unclear",
        }
    }

    /// Terminal status reached when this result is applied
    pub fn terminal_status(&self) -> PredictionStatus {
        match self {
            ResolutionResult::Boy | ResolutionResult::Girl => PredictionStatus::Sent,
            ResolutionResult::Unclear => PredictionStatus::Refunded,
        }
    }

    /// Parse an action token exactly as sent by review channels ("boy", "girl", "unclear")
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "boy" => Some(ResolutionResult::Boy),
            "girl" => Some(ResolutionResult::Girl),
            "unclear" => Some(ResolutionResult::Unclear),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown result: {}", s)))
    }
}

/// Customer-facing lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Sent,
    Refunded,
    PaymentFailed,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Sent => "sent",
            PredictionStatus::Refunded => "refunded",
            PredictionStatus::PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PredictionStatus::Pending),
            "sent" => Ok(PredictionStatus::Sent),
            "refunded" => Ok(PredictionStatus::Refunded),
            "payment_failed" => Ok(PredictionStatus::PaymentFailed),
            other => Err(Error::InvalidInput(format!("Unknown status: {}", other))),
        }
    }
}

/// Location of a review prompt in the messaging channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewMessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Per-submission record tracking payment, classification, resolution and outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,

    // Payment linkage
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub payment_confirmed_via_webhook: bool,
    /// Amount paid in minor currency units (pence)
    pub amount_paid: Option<i64>,

    // Submission data
    pub customer_email: String,
    /// Opaque image-store key; never a public URL
    pub image_ref: String,
    pub referral_code: Option<String>,

    // Classification data
    pub ai_prediction: Option<Verdict>,
    pub ai_confidence: Option<f64>,
    pub ai_raw_response: Option<String>,

    // Resolution data
    pub manual_review_result: Option<ResolutionResult>,
    pub final_result: Option<ResolutionResult>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub result_sent_at: Option<DateTime<Utc>>,

    // Refund data
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub refund_processed_at: Option<DateTime<Utc>>,

    pub status: PredictionStatus,
    pub review_message: Option<ReviewMessageRef>,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    /// True once any resolution has been recorded
    pub fn is_resolved(&self) -> bool {
        self.final_result.is_some() || self.manual_review_result.is_some()
    }
}

/// Referral attribution and commission accrual (amounts in pence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralCode {
    pub code: String,
    pub influencer_name: String,
    pub is_active: bool,
    pub commission_per_sale: i64,
    pub uses_count: i64,
    pub total_commission_owed: i64,
    pub total_commission_paid: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parse_is_case_insensitive() {
        assert_eq!(" BOY ".parse::<Verdict>().unwrap(), Verdict::Boy);
        assert_eq!("Girl".parse::<Verdict>().unwrap(), Verdict::Girl);
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_resolution_tokens_are_exact() {
        assert_eq!(ResolutionResult::from_token("boy"), Some(ResolutionResult::Boy));
        assert_eq!(ResolutionResult::from_token("unclear"), Some(ResolutionResult::Unclear));
        assert_eq!(ResolutionResult::from_token("BOY"), None);
        assert_eq!(ResolutionResult::from_token("invalid"), None);
    }

    #[test]
    fn test_terminal_status_per_result() {
        assert_eq!(ResolutionResult::Boy.terminal_status(), PredictionStatus::Sent);
        assert_eq!(ResolutionResult::Girl.terminal_status(), PredictionStatus::Sent);
        assert_eq!(ResolutionResult::Unclear.terminal_status(), PredictionStatus::Refunded);
    }

    #[test]
    fn test_status_round_trips_through_db_text() {
        for status in [
            PredictionStatus::Pending,
            PredictionStatus::Sent,
            PredictionStatus::Refunded,
            PredictionStatus::PaymentFailed,
        ] {
            assert_eq!(status.as_str().parse::<PredictionStatus>().unwrap(), status);
        }
    }
}
