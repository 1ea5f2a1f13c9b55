//! Prediction transitions
//!
//! Every write to a `predictions` row goes through one of the functions
//! below. Guards live in the `WHERE` clause, so each transition is a single
//! compare-and-set statement regardless of how many triggers race on the row.

use chrono::{DateTime, Utc};
use nubcheck_common::db::retry_on_lock;
use nubcheck_common::{
    Error, Prediction, PredictionStatus, ResolutionResult, Result, ReviewMessageRef, Verdict,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::fmt;

use super::outbox::{enqueue, JobPayload};
use super::referrals::credit_sale_in;
use super::{parse_db_time, parse_opt_db_time, to_db_time, Store};

const SELECT_PREDICTION: &str = r#"
    SELECT id, checkout_session_id, payment_intent_id, payment_confirmed_via_webhook,
           amount_paid, customer_email, image_ref, referral_code,
           ai_prediction, ai_confidence, ai_raw_response,
           manual_review_result, final_result, reviewed_at, result_sent_at,
           refund_requested_at, refund_processed_at, status,
           review_chat_id, review_message_id, created_at
    FROM predictions
"#;

/// Submission data for a verified-paid checkout session
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub id: String,
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub amount_paid: Option<i64>,
    pub customer_email: String,
    pub image_ref: String,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Prediction),
    /// The checkout session was already ingested
    Existing(Prediction),
}

impl InsertOutcome {
    pub fn prediction(&self) -> &Prediction {
        match self {
            InsertOutcome::Inserted(p) | InsertOutcome::Existing(p) => p,
        }
    }
}

/// Channel that delivered a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Admin,
    Bot,
    Auto,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionSource::Admin => "admin",
            ResolutionSource::Bot => "bot",
            ResolutionSource::Auto => "auto",
        })
    }
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// This call set the final result
    Resolved(Prediction),
    /// A previous resolution stands; nothing was written
    AlreadyResolved(Prediction),
    NotFound,
}

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    let ai_prediction = row
        .try_get::<Option<String>, _>("ai_prediction")?
        .map(|v| v.parse::<Verdict>())
        .transpose()?;
    let manual_review_result = row
        .try_get::<Option<String>, _>("manual_review_result")?
        .map(|v| v.parse::<ResolutionResult>())
        .transpose()?;
    let final_result = row
        .try_get::<Option<String>, _>("final_result")?
        .map(|v| v.parse::<ResolutionResult>())
        .transpose()?;
    let status: String = row.try_get("status")?;

    let review_chat_id: Option<i64> = row.try_get("review_chat_id")?;
    let review_message_id: Option<i64> = row.try_get("review_message_id")?;
    let review_message = match (review_chat_id, review_message_id) {
        (Some(chat_id), Some(message_id)) => Some(ReviewMessageRef {
            chat_id,
            message_id,
        }),
        _ => None,
    };

    let created_at: String = row.try_get("created_at")?;

    Ok(Prediction {
        id: row.try_get("id")?,
        checkout_session_id: row.try_get("checkout_session_id")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        payment_confirmed_via_webhook: row.try_get("payment_confirmed_via_webhook")?,
        amount_paid: row.try_get("amount_paid")?,
        customer_email: row.try_get("customer_email")?,
        image_ref: row.try_get("image_ref")?,
        referral_code: row.try_get("referral_code")?,
        ai_prediction,
        ai_confidence: row.try_get("ai_confidence")?,
        ai_raw_response: row.try_get("ai_raw_response")?,
        manual_review_result,
        final_result,
        reviewed_at: parse_opt_db_time("reviewed_at", row.try_get("reviewed_at")?)?,
        result_sent_at: parse_opt_db_time("result_sent_at", row.try_get("result_sent_at")?)?,
        refund_requested_at: parse_opt_db_time(
            "refund_requested_at",
            row.try_get("refund_requested_at")?,
        )?,
        refund_processed_at: parse_opt_db_time(
            "refund_processed_at",
            row.try_get("refund_processed_at")?,
        )?,
        status: status.parse::<PredictionStatus>()?,
        review_message,
        created_at: parse_db_time("created_at", &created_at)?,
    })
}

async fn fetch_by_id(conn: &mut SqliteConnection, id: &str) -> Result<Option<Prediction>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PREDICTION))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(prediction_from_row).transpose()
}

async fn fetch_by_session(conn: &mut SqliteConnection, session_id: &str) -> Result<Option<Prediction>> {
    let row = sqlx::query(&format!("{} WHERE checkout_session_id = ?", SELECT_PREDICTION))
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(prediction_from_row).transpose()
}

impl Store {
    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch by primary id; always reflects the latest committed write
    pub async fn get(&self, id: &str) -> Result<Option<Prediction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_id(&mut conn, id).await
    }

    /// Fetch by id, mapping absence to `Error::NotFound`
    pub async fn require(&self, id: &str) -> Result<Prediction> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Prediction not found: {}", id)))
    }

    pub async fn find_by_session(&self, session_id: &str) -> Result<Option<Prediction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_session(&mut conn, session_id).await
    }

    pub async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(&format!(
            "{} WHERE payment_intent_id = ? ORDER BY created_at",
            SELECT_PREDICTION
        ))
        .bind(payment_intent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    /// Newest first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY created_at DESC, id LIMIT ?",
            SELECT_PREDICTION
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Create a `pending` prediction, idempotent per checkout session
    ///
    /// In the same transaction: credits the referral code (atomic increment),
    /// enqueues classification and any `extra_jobs` (e.g. the new-submission
    /// alert). A session that was already ingested returns the existing row and
    /// writes nothing.
    pub async fn insert_pending(
        &self,
        new: &NewPrediction,
        extra_jobs: &[JobPayload],
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let pool = &self.pool;
        let created_at = to_db_time(now);
        let created_at = created_at.as_str();

        retry_on_lock("insert_pending", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO predictions (
                    id, checkout_session_id, payment_intent_id, amount_paid,
                    customer_email, image_ref, referral_code, status, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                ON CONFLICT(checkout_session_id) DO NOTHING
                "#,
            )
            .bind(&new.id)
            .bind(&new.checkout_session_id)
            .bind(&new.payment_intent_id)
            .bind(new.amount_paid)
            .bind(&new.customer_email)
            .bind(&new.image_ref)
            .bind(&new.referral_code)
            .bind(created_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            if !inserted {
                let existing = fetch_by_session(&mut tx, &new.checkout_session_id)
                    .await?
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "Session {} conflicted but no row found",
                            new.checkout_session_id
                        ))
                    })?;
                tx.rollback().await?;
                return Ok(InsertOutcome::Existing(existing));
            }

            if let Some(code) = new.referral_code.as_deref() {
                credit_sale_in(&mut tx, code).await?;
            }

            let now_ms = now.timestamp_millis();
            enqueue(
                &mut tx,
                &JobPayload::Classify {
                    prediction_id: new.id.clone(),
                },
                now_ms,
            )
            .await?;
            for job in extra_jobs {
                enqueue(&mut tx, job, now_ms).await?;
            }

            let prediction = fetch_by_id(&mut tx, &new.id)
                .await?
                .ok_or_else(|| Error::Internal(format!("Inserted prediction {} vanished", new.id)))?;
            tx.commit().await?;

            Ok(InsertOutcome::Inserted(prediction))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Classification and review prompt
    // ------------------------------------------------------------------

    /// Persist AI fields and enqueue the review prompt (status unchanged)
    ///
    /// Returns the updated prediction, or `None` if the id is unknown.
    pub async fn record_classification(
        &self,
        id: &str,
        verdict: Verdict,
        confidence: f64,
        raw_response: &str,
    ) -> Result<Option<Prediction>> {
        let pool = &self.pool;
        retry_on_lock("record_classification", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let updated = sqlx::query(
                r#"
                UPDATE predictions
                SET ai_prediction = ?, ai_confidence = ?, ai_raw_response = ?
                WHERE id = ?
                "#,
            )
            .bind(verdict.as_str())
            .bind(confidence)
            .bind(raw_response)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            enqueue(
                &mut tx,
                &JobPayload::ReviewPrompt {
                    prediction_id: id.to_string(),
                },
                Utc::now().timestamp_millis(),
            )
            .await?;

            let prediction = fetch_by_id(&mut tx, id).await?;
            tx.commit().await?;
            Ok(prediction)
        })
        .await
    }

    /// Remember where the review prompt was posted
    ///
    /// `posted_open` says the prompt went out with live buttons. If a
    /// resolution landed while it was being sent, a close-prompt job is
    /// enqueued in the same transaction.
    pub async fn record_review_prompt(
        &self,
        id: &str,
        message: ReviewMessageRef,
        posted_open: bool,
    ) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("record_review_prompt", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            sqlx::query(
                "UPDATE predictions SET review_chat_id = ?, review_message_id = ? WHERE id = ?",
            )
            .bind(message.chat_id)
            .bind(message.message_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if posted_open {
                let resolved = fetch_by_id(&mut tx, id)
                    .await?
                    .is_some_and(|prediction| prediction.final_result.is_some());
                if resolved {
                    let job = JobPayload::ClosePrompt {
                        prediction_id: id.to_string(),
                    };
                    enqueue(&mut tx, &job, Utc::now().timestamp_millis()).await?;
                }
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Apply the one and only resolution for a prediction
    ///
    /// The "already resolved" check and the write are one conditional
    /// `UPDATE`. On success the notification jobs are enqueued in the same
    /// transaction, so they become visible to the dispatcher only after the
    /// resolution fields are durable:
    /// - boy/girl: `status = sent`, `result_sent_at` set, result email job
    /// - unclear: `status = refunded`, `refund_requested_at` set, refund and
    ///   unclear-email jobs
    /// - admin or auto source with a known bot prompt: close-prompt job
    pub async fn resolve(
        &self,
        id: &str,
        result: ResolutionResult,
        source: ResolutionSource,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let pool = &self.pool;
        let now_text = to_db_time(now);
        let now_text = now_text.as_str();
        let is_unclear = result == ResolutionResult::Unclear;

        retry_on_lock("resolve", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let updated = sqlx::query(
                r#"
                UPDATE predictions
                SET manual_review_result = ?1,
                    final_result = ?1,
                    status = ?2,
                    reviewed_at = ?3,
                    result_sent_at = CASE WHEN ?4 THEN result_sent_at ELSE ?3 END,
                    refund_requested_at = CASE WHEN ?4 THEN COALESCE(refund_requested_at, ?3)
                                               ELSE refund_requested_at END
                WHERE id = ?5
                  AND final_result IS NULL
                  AND manual_review_result IS NULL
                "#,
            )
            .bind(result.as_str())
            .bind(result.terminal_status().as_str())
            .bind(now_text)
            .bind(is_unclear)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                let existing = fetch_by_id(&mut tx, id).await?;
                tx.rollback().await?;
                return Ok(match existing {
                    Some(prediction) => ResolveOutcome::AlreadyResolved(prediction),
                    None => ResolveOutcome::NotFound,
                });
            }

            let prediction = fetch_by_id(&mut tx, id)
                .await?
                .ok_or_else(|| Error::Internal(format!("Resolved prediction {} vanished", id)))?;

            let prediction_id = id.to_string();
            let mut jobs = Vec::with_capacity(3);
            if is_unclear {
                jobs.push(JobPayload::Refund {
                    prediction_id: prediction_id.clone(),
                });
                jobs.push(JobPayload::UnclearEmail {
                    prediction_id: prediction_id.clone(),
                });
            } else {
                jobs.push(JobPayload::ResultEmail {
                    prediction_id: prediction_id.clone(),
                });
            }
            // The bot path edits its own prompt inline
            if source != ResolutionSource::Bot && prediction.review_message.is_some() {
                jobs.push(JobPayload::ClosePrompt { prediction_id });
            }

            let now_ms = now.timestamp_millis();
            for job in &jobs {
                enqueue(&mut tx, job, now_ms).await?;
            }

            tx.commit().await?;
            Ok(ResolveOutcome::Resolved(prediction))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Payment and refund
    // ------------------------------------------------------------------

    /// Set `payment_confirmed_via_webhook` for a checkout session (false -> true only)
    ///
    /// Returns the number of rows that changed; a replay changes none.
    pub async fn confirm_payment_by_session(&self, session_id: &str) -> Result<u64> {
        let pool = &self.pool;
        retry_on_lock("confirm_payment_by_session", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                UPDATE predictions SET payment_confirmed_via_webhook = 1
                WHERE checkout_session_id = ? AND payment_confirmed_via_webhook = 0
                "#,
            )
            .bind(session_id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Set `payment_confirmed_via_webhook` for a payment intent (false -> true only)
    pub async fn confirm_payment_by_intent(&self, payment_intent_id: &str) -> Result<u64> {
        let pool = &self.pool;
        retry_on_lock("confirm_payment_by_intent", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                UPDATE predictions SET payment_confirmed_via_webhook = 1
                WHERE payment_intent_id = ? AND payment_confirmed_via_webhook = 0
                "#,
            )
            .bind(payment_intent_id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Link a payment intent to a session's prediction when none is recorded yet
    pub async fn attach_payment_intent(&self, session_id: &str, payment_intent_id: &str) -> Result<u64> {
        let pool = &self.pool;
        retry_on_lock("attach_payment_intent", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                UPDATE predictions SET payment_intent_id = ?
                WHERE checkout_session_id = ? AND payment_intent_id IS NULL
                "#,
            )
            .bind(payment_intent_id)
            .bind(session_id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Provider reported a failed payment; only `pending` predictions move
    ///
    /// `alert` is enqueued whether or not a prediction matched.
    pub async fn mark_payment_failed(&self, payment_intent_id: &str, alert: &JobPayload) -> Result<u64> {
        let pool = &self.pool;
        retry_on_lock("mark_payment_failed", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let changed = sqlx::query(
                r#"
                UPDATE predictions SET status = 'payment_failed'
                WHERE payment_intent_id = ? AND status = 'pending'
                "#,
            )
            .bind(payment_intent_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            enqueue(&mut tx, alert, Utc::now().timestamp_millis()).await?;
            tx.commit().await?;
            Ok(changed)
        })
        .await
    }

    /// Provider reported a refunded charge for this payment intent
    ///
    /// Sets `status = refunded` and the first `refund_processed_at`. Replays
    /// leave the row as it is. `alert` is enqueued whether or not a prediction
    /// matched.
    pub async fn mark_refunded_by_intent(
        &self,
        payment_intent_id: &str,
        alert: &JobPayload,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let pool = &self.pool;
        let now_text = to_db_time(now);
        let now_text = now_text.as_str();

        retry_on_lock("mark_refunded_by_intent", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let changed = sqlx::query(
                r#"
                UPDATE predictions
                SET status = 'refunded',
                    refund_processed_at = COALESCE(refund_processed_at, ?)
                WHERE payment_intent_id = ?
                  AND (status != 'refunded' OR refund_processed_at IS NULL)
                "#,
            )
            .bind(now_text)
            .bind(payment_intent_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            enqueue(&mut tx, alert, now.timestamp_millis()).await?;
            tx.commit().await?;
            Ok(changed)
        })
        .await
    }

    /// Record that our own refund request reached the provider (first time only)
    pub async fn mark_refund_processed(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let pool = &self.pool;
        let now_text = to_db_time(now);
        let now_text = now_text.as_str();

        retry_on_lock("mark_refund_processed", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                UPDATE predictions
                SET status = 'refunded', refund_processed_at = ?
                WHERE id = ? AND refund_processed_at IS NULL
                "#,
            )
            .bind(now_text)
            .bind(id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    /// Customer asked for a refund; records the first request and enqueues `alert`
    ///
    /// Returns `None` for an unknown id.
    pub async fn request_refund(
        &self,
        id: &str,
        alert: &JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Option<Prediction>> {
        let pool = &self.pool;
        let now_text = to_db_time(now);
        let now_text = now_text.as_str();

        retry_on_lock("request_refund", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let updated = sqlx::query(
                r#"
                UPDATE predictions
                SET refund_requested_at = COALESCE(refund_requested_at, ?)
                WHERE id = ?
                "#,
            )
            .bind(now_text)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            enqueue(&mut tx, alert, now.timestamp_millis()).await?;
            let prediction = fetch_by_id(&mut tx, id).await?;
            tx.commit().await?;
            Ok(prediction)
        })
        .await
    }
}
