//! Message templates
//!
//! Pure functions from prediction data to message text. Review-chat messages
//! are plain text (no parse mode), so nothing here needs escaping for the bot.

use nubcheck_common::{Prediction, ResolutionResult};

use super::{EmailMessage, ReviewAction};

/// Confidence quoted in the result email when the classifier gave none or zero
pub const DEFAULT_CONFIDENCE: f64 = 75.0;

pub const RESULT_SUBJECT: &str = "Your Baby Gender Prediction Results 👶";
pub const UNCLEAR_SUBJECT: &str = "Refund Issued - Image Quality Issue";

/// Minor units to "£12.34"
pub fn format_pounds(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    let pence = pence.unsigned_abs();
    format!("{}£{}.{:02}", sign, pence / 100, pence % 100)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn result_email(prediction: &Prediction, result: ResolutionResult, public_base_url: &str) -> EmailMessage {
    let confidence = prediction
        .ai_confidence
        .filter(|c| *c > 0.0)
        .unwrap_or(DEFAULT_CONFIDENCE);
    let refund_url = format!("{}/refund/{}", public_base_url, prediction.id);
    let (headline, accent, tint) = match result {
        ResolutionResult::Girl => ("It's a GIRL! 💗", "#FFC0CB", "#fce4ec"),
        _ => ("It's a BOY! 💙", "#4A90E2", "#e3f2fd"),
    };
    let token = result.as_str().to_ascii_uppercase();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <h1>🎉 Your Results Are Ready!</h1>
      <p>Hi there!</p>
      <p>We've analyzed your 12-week ultrasound scan.</p>
      <div style="background: {tint}; border: 2px solid {accent}; padding: 20px; border-radius: 10px; text-align: center;">
        <p style="margin: 0;">Our prediction:</p>
        <div style="font-size: 36px; font-weight: bold; color: {accent};">{headline}</div>
        <div style="font-size: 24px; color: #666;">Confidence: {confidence:.0}%</div>
      </div>
      <p>This prediction is based on nub theory analysis and verified by a certified sonographer.</p>
      <ul>
        <li>This is for entertainment purposes only</li>
        <li>Your 20-week anatomy scan will confirm the gender</li>
        <li>If our prediction is wrong, we'll issue a full refund</li>
      </ul>
      <p style="text-align: center;"><a href="{refund_url}">Request Refund (if incorrect)</a></p>
      <p>Questions? Just reply to this email.</p>
      <p>Best wishes,<br><strong>The Nub Prediction Team</strong></p>
      <p style="font-size: 12px; color: #666;">For entertainment purposes only. Not medical advice.</p>
    </div>
  </body>
</html>"#,
        tint = tint,
        accent = accent,
        headline = headline,
        confidence = confidence,
        refund_url = escape_html(&refund_url),
    );

    let text = format!(
        "Hi there!\n\n\
         We've analyzed your 12-week ultrasound scan.\n\n\
         Our prediction: {token}\n\
         Confidence: {confidence:.0}%\n\n\
         This prediction is based on nub theory analysis and verified by a certified sonographer.\n\n\
         What's next?\n\
         - This is for entertainment only (not medical advice)\n\
         - Your 20-week anatomy scan will confirm the gender\n\
         - If our prediction is wrong, upload your 20-week confirmation scan for a full refund: {refund_url}\n\n\
         Questions? Just reply to this email.\n\n\
         Best wishes,\n\
         The Nub Prediction Team",
        token = token,
        confidence = confidence,
        refund_url = refund_url,
    );

    EmailMessage {
        to: prediction.customer_email.clone(),
        subject: RESULT_SUBJECT.to_string(),
        html,
        text,
    }
}

pub fn unclear_email(prediction: &Prediction) -> EmailMessage {
    let html = r#"<!DOCTYPE html>
<html>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <h1>We Couldn't Analyze Your Scan</h1>
      <p>Hi there,</p>
      <p>We've reviewed your ultrasound scan, but unfortunately the nub isn't clearly visible in the image you uploaded. This can happen when:</p>
      <ul>
        <li>The baby is positioned at the wrong angle</li>
        <li>The image quality is too low</li>
        <li>The scan was taken too early (before 12 weeks)</li>
      </ul>
      <div style="background: #e3f2fd; padding: 15px; border-left: 4px solid #4A90E2;">
        <strong>✅ Refund Processed</strong>
        <p>We've issued a full refund to your payment method. You should see it in your account in 5-7 business days.</p>
      </div>
      <p>You're welcome to try again with a clearer side view of the baby.</p>
      <p>Best wishes,<br><strong>The Nub Prediction Team</strong></p>
    </div>
  </body>
</html>"#
        .to_string();

    let text = "Hi there,\n\n\
         We've reviewed your ultrasound scan, but unfortunately the nub isn't clearly visible in the image you uploaded.\n\n\
         We've issued a full refund to your payment method. You should see it in your account in 5-7 business days.\n\n\
         You're welcome to try again with a clearer side view of the baby.\n\n\
         Best wishes,\n\
         The Nub Prediction Team"
        .to_string();

    EmailMessage {
        to: prediction.customer_email.clone(),
        subject: UNCLEAR_SUBJECT.to_string(),
        html,
        text,
    }
}

/// Caption of the review prompt
pub fn review_caption(prediction: &Prediction) -> String {
    let ai_line = match (prediction.ai_prediction, prediction.ai_confidence) {
        (Some(verdict), Some(confidence)) => {
            format!("AI says: {} ({:.0}%)", verdict.token(), confidence)
        }
        (Some(verdict), None) => format!("AI says: {}", verdict.token()),
        (None, _) => "AI verdict unavailable".to_string(),
    };

    format!(
        "🔍 New scan to review\n\n{}\nEmail: {}\nID: {}",
        ai_line, prediction.customer_email, prediction.id
    )
}

/// Caption once a decision has been recorded
pub fn reviewed_caption(original: &str, result: ResolutionResult) -> String {
    format!("{}\n\n✅ Reviewed: {}", original, result.label())
}

pub fn review_actions(prediction_id: &str) -> Vec<ReviewAction> {
    [
        ResolutionResult::Boy,
        ResolutionResult::Girl,
        ResolutionResult::Unclear,
    ]
    .into_iter()
    .map(|result| ReviewAction {
        label: result.label().to_string(),
        callback_data: format!("{}:{}", result.as_str(), prediction_id),
    })
    .collect()
}

pub fn new_submission_alert(
    prediction_id: &str,
    customer_email: &str,
    amount_paid: Option<i64>,
    referral_code: Option<&str>,
) -> String {
    let mut text = format!(
        "🆕 New Prediction Submitted\n\nID: {}\nEmail: {}",
        prediction_id, customer_email
    );
    if let Some(amount) = amount_paid {
        text.push_str(&format!("\nAmount: {}", format_pounds(amount)));
    }
    if let Some(code) = referral_code {
        text.push_str(&format!("\nReferral: {}", code));
    }
    text
}

pub fn payment_failed_alert(
    payment_intent_id: &str,
    customer_email: Option<&str>,
    amount: i64,
    failure: Option<&str>,
) -> String {
    let mut text = format!("⚠️ Payment Failed\n\nPayment Intent: {}\n", payment_intent_id);
    if let Some(email) = customer_email.filter(|e| !e.is_empty()) {
        text.push_str(&format!("Email: {}\n", email));
    }
    text.push_str(&format!(
        "Amount: {}\nFailure: {}",
        format_pounds(amount),
        failure.unwrap_or("Unknown")
    ));
    text
}

pub fn refund_processed_alert(payment_intent_id: &str, amount_refunded: i64) -> String {
    format!(
        "💷 Refund Processed\n\nPayment Intent: {}\nAmount Refunded: {}",
        payment_intent_id,
        format_pounds(amount_refunded)
    )
}

pub fn refund_requested_alert(prediction: &Prediction, reason: Option<&str>) -> String {
    format!(
        "🔁 Refund Requested\n\nID: {}\nEmail: {}\nResult: {}\nReason: {}",
        prediction.id,
        prediction.customer_email,
        prediction
            .final_result
            .map(|r| r.as_str())
            .unwrap_or("not yet resolved"),
        reason.filter(|r| !r.trim().is_empty()).unwrap_or("none given")
    )
}

pub fn job_failed_alert(kind: &str, idempotency_key: &str, attempts: i64, error: &str) -> String {
    format!(
        "🚨 Job Failed\n\nJob: {}\nKey: {}\nAttempts: {}\nLast error: {}\n\nManual follow-up required.",
        kind, idempotency_key, attempts, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nubcheck_common::{PredictionStatus, Verdict};

    fn prediction() -> Prediction {
        Prediction {
            id: "p42".into(),
            checkout_session_id: "sess_1".into(),
            payment_intent_id: None,
            payment_confirmed_via_webhook: false,
            amount_paid: Some(1999),
            customer_email: "parent@example.com".into(),
            image_ref: "ultrasounds/x.jpg".into(),
            referral_code: None,
            ai_prediction: Some(Verdict::Boy),
            ai_confidence: Some(82.0),
            ai_raw_response: None,
            manual_review_result: None,
            final_result: None,
            reviewed_at: None,
            result_sent_at: None,
            refund_requested_at: None,
            refund_processed_at: None,
            status: PredictionStatus::Pending,
            review_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_pounds() {
        assert_eq!(format_pounds(1999), "£19.99");
        assert_eq!(format_pounds(5), "£0.05");
        assert_eq!(format_pounds(-250), "-£2.50");
    }

    #[test]
    fn test_review_caption_and_actions() {
        let p = prediction();
        assert_eq!(
            review_caption(&p),
            "🔍 New scan to review\n\nAI says: BOY (82%)\nEmail: parent@example.com\nID: p42"
        );

        let actions = review_actions("p42");
        let data: Vec<_> = actions.iter().map(|a| a.callback_data.as_str()).collect();
        assert_eq!(data, vec!["boy:p42", "girl:p42", "unclear:p42"]);
        assert_eq!(actions[1].label, "👧 Girl");
    }

    #[test]
    fn test_caption_without_ai_hint() {
        let mut p = prediction();
        p.ai_prediction = None;
        p.ai_confidence = None;
        assert!(review_caption(&p).contains("AI verdict unavailable"));
    }

    #[test]
    fn test_result_email_uses_default_confidence() {
        let mut p = prediction();
        p.ai_confidence = None;
        let email = result_email(&p, ResolutionResult::Girl, "https://nub.example");
        assert_eq!(email.to, "parent@example.com");
        assert_eq!(email.subject, RESULT_SUBJECT);
        assert!(email.text.contains("Our prediction: GIRL"));
        assert!(email.text.contains("Confidence: 75%"));
        assert!(email.text.contains("https://nub.example/refund/p42"));
        assert!(email.html.contains("It's a GIRL!"));
    }

    #[test]
    fn test_result_email_treats_zero_confidence_as_missing() {
        let mut p = prediction();
        p.ai_prediction = Some(Verdict::Unclear);
        p.ai_confidence = Some(0.0);
        let email = result_email(&p, ResolutionResult::Boy, "https://nub.example");
        assert!(email.text.contains("Confidence: 75%"));
        assert!(!email.text.contains("Confidence: 0%"));
        assert!(email.html.contains("Confidence: 75%"));
    }

    #[test]
    fn test_reviewed_caption() {
        assert_eq!(
            reviewed_caption("caption", ResolutionResult::Unclear),
            "caption\n\n✅ Reviewed: ❓ Unclear"
        );
    }
}
