//! Transactional outbox
//!
//! Side effects (classification, review prompts, emails, refunds, alerts) are
//! written as `jobs` rows in the same transaction as the state change that
//! requires them. The idempotency key is UNIQUE, so re-enqueueing the same
//! effect is a no-op. Times are unix milliseconds.

use nubcheck_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::Store;
use nubcheck_common::db::retry_on_lock;

/// Work item persisted in the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Classify { prediction_id: String },
    ReviewPrompt { prediction_id: String },
    ResultEmail { prediction_id: String },
    UnclearEmail { prediction_id: String },
    Refund { prediction_id: String },
    ClosePrompt { prediction_id: String },
    /// Operational message to the review chat; `key` deduplicates replays
    Alert { key: String, text: String },
}

impl JobPayload {
    pub fn alert(key: impl Into<String>, text: impl Into<String>) -> Self {
        JobPayload::Alert {
            key: key.into(),
            text: text.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Classify { .. } => "classify",
            JobPayload::ReviewPrompt { .. } => "review_prompt",
            JobPayload::ResultEmail { .. } => "result_email",
            JobPayload::UnclearEmail { .. } => "unclear_email",
            JobPayload::Refund { .. } => "refund",
            JobPayload::ClosePrompt { .. } => "close_prompt",
            JobPayload::Alert { .. } => "alert",
        }
    }

    /// `<kind>:<prediction id>` or `alert:<key>`
    pub fn idempotency_key(&self) -> String {
        match self {
            JobPayload::Classify { prediction_id }
            | JobPayload::ReviewPrompt { prediction_id }
            | JobPayload::ResultEmail { prediction_id }
            | JobPayload::UnclearEmail { prediction_id }
            | JobPayload::Refund { prediction_id }
            | JobPayload::ClosePrompt { prediction_id } => {
                format!("{}:{}", self.kind(), prediction_id)
            }
            JobPayload::Alert { key, .. } => format!("alert:{}", key),
        }
    }

    pub fn prediction_id(&self) -> Option<&str> {
        match self {
            JobPayload::Classify { prediction_id }
            | JobPayload::ReviewPrompt { prediction_id }
            | JobPayload::ResultEmail { prediction_id }
            | JobPayload::UnclearEmail { prediction_id }
            | JobPayload::Refund { prediction_id }
            | JobPayload::ClosePrompt { prediction_id } => Some(prediction_id),
            JobPayload::Alert { .. } => None,
        }
    }
}

/// Job leased to a worker by [`Store::claim_next_job`]
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub kind: String,
    pub idempotency_key: String,
    /// Attempt number of this run (1-based)
    pub attempts: i64,
    raw_payload: String,
}

impl ClaimedJob {
    pub fn payload(&self) -> Result<JobPayload> {
        serde_json::from_str(&self.raw_payload).map_err(|e| {
            Error::Internal(format!("Corrupt payload for job {}: {}", self.id, e))
        })
    }

    #[cfg(test)]
    pub(crate) fn for_test(kind: &str, idempotency_key: &str, attempts: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            idempotency_key: idempotency_key.to_string(),
            attempts,
            raw_payload: String::new(),
        }
    }
}

/// Insert a job inside an open transaction; false when the key already exists
pub(crate) async fn enqueue(
    conn: &mut SqliteConnection,
    job: &JobPayload,
    now_ms: i64,
) -> Result<bool> {
    let payload = serde_json::to_string(job)
        .map_err(|e| Error::Internal(format!("Failed to serialize job: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO jobs (id, kind, payload, idempotency_key, attempts, created_at, next_attempt_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job.kind())
    .bind(&payload)
    .bind(job.idempotency_key())
    .bind(now_ms)
    .bind(now_ms)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

impl Store {
    /// Enqueue a standalone job (no accompanying state change)
    pub async fn enqueue_job(&self, job: &JobPayload) -> Result<bool> {
        let pool = &self.pool;
        retry_on_lock("enqueue_job", self.max_lock_wait_ms, || async move {
            let mut conn = pool.acquire().await?;
            enqueue(&mut conn, job, chrono::Utc::now().timestamp_millis()).await
        })
        .await
    }

    /// Atomically lease the oldest due job
    ///
    /// A job is due when it is neither processed nor failed, its
    /// `next_attempt_at` has passed and no unexpired lease exists. The lease and
    /// the attempt counter are set by the same statement, so two workers can
    /// never claim the same row.
    pub async fn claim_next_job(&self, now_ms: i64, lease_ms: i64) -> Result<Option<ClaimedJob>> {
        let pool = &self.pool;
        retry_on_lock("claim_next_job", self.max_lock_wait_ms, || async move {
            let row = sqlx::query(
                r#"
                UPDATE jobs
                SET attempts = attempts + 1, locked_until = ?
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE processed_at IS NULL
                      AND failed_at IS NULL
                      AND next_attempt_at <= ?
                      AND (locked_until IS NULL OR locked_until <= ?)
                    ORDER BY next_attempt_at, created_at
                    LIMIT 1
                )
                RETURNING id, kind, payload, idempotency_key, attempts
                "#,
            )
            .bind(now_ms + lease_ms)
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(pool)
            .await?;

            Ok(row.map(|row| ClaimedJob {
                id: row.get("id"),
                kind: row.get("kind"),
                idempotency_key: row.get("idempotency_key"),
                attempts: row.get("attempts"),
                raw_payload: row.get("payload"),
            }))
        })
        .await
    }

    pub async fn complete_job(&self, job_id: &str, now_ms: i64) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("complete_job", self.max_lock_wait_ms, || async move {
            sqlx::query(
                "UPDATE jobs SET processed_at = ?, locked_until = NULL, last_error = NULL WHERE id = ?",
            )
            .bind(now_ms)
            .bind(job_id)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Release the lease and schedule another attempt
    pub async fn reschedule_job(&self, job_id: &str, next_attempt_at_ms: i64, error: &str) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("reschedule_job", self.max_lock_wait_ms, || async move {
            sqlx::query(
                "UPDATE jobs SET next_attempt_at = ?, locked_until = NULL, last_error = ? WHERE id = ?",
            )
            .bind(next_attempt_at_ms)
            .bind(error)
            .bind(job_id)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Give up on a job and enqueue its escalation jobs in the same transaction
    pub async fn fail_job(
        &self,
        job_id: &str,
        now_ms: i64,
        error: &str,
        follow_ups: &[JobPayload],
    ) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("fail_job", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            sqlx::query(
                "UPDATE jobs SET failed_at = ?, locked_until = NULL, last_error = ? WHERE id = ?",
            )
            .bind(now_ms)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            for job in follow_ups {
                enqueue(&mut tx, job, now_ms).await?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Jobs still waiting to run (reported by `/health`)
    pub async fn count_open_jobs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE processed_at IS NULL AND failed_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
