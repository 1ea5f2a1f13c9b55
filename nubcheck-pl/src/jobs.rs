//! Outbox job dispatcher
//!
//! Claims due jobs one at a time, runs them and records the outcome.
//! Delivery is at-least-once; every handler tolerates running twice.
//!
//! Failure handling:
//! - retry with exponential backoff (`backoff_base_ms * 2^(attempt-1)`, capped)
//! - after `max_attempts`, mark failed and enqueue an operator alert
//! - a classification that gives up still gets a review prompt, without
//!   the AI hint, so manual resolution is never blocked

use anyhow::{anyhow, Context};
use chrono::Utc;
use nubcheck_common::config::JobsConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Lifecycle;
use crate::notify::{templates, Notifier};
use crate::payments::Reconciler;
use crate::store::{ClaimedJob, JobPayload, Store};

/// Retry delay before the next attempt
fn backoff_ms(config: &JobsConfig, attempts: i64) -> u64 {
    let exponent = (attempts - 1).clamp(0, 20) as u32;
    config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_max_ms)
}

/// Jobs to enqueue when `payload` gives up
fn escalation(payload: &JobPayload, job: &ClaimedJob, error: &str) -> Vec<JobPayload> {
    let alert = || {
        JobPayload::alert(
            format!("job_failed:{}", job.idempotency_key),
            templates::job_failed_alert(&job.kind, &job.idempotency_key, job.attempts, error),
        )
    };

    match payload {
        JobPayload::Alert { .. } => Vec::new(),
        JobPayload::Classify { prediction_id } => vec![
            JobPayload::ReviewPrompt {
                prediction_id: prediction_id.clone(),
            },
            alert(),
        ],
        _ => vec![alert()],
    }
}

#[derive(Clone)]
pub struct JobDispatcher {
    store: Store,
    lifecycle: Lifecycle,
    reconciler: Reconciler,
    notifier: Notifier,
    config: JobsConfig,
    wake: Arc<Notify>,
}

impl JobDispatcher {
    pub fn new(
        store: Store,
        lifecycle: Lifecycle,
        reconciler: Reconciler,
        notifier: Notifier,
        config: JobsConfig,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            reconciler,
            notifier,
            config,
            wake,
        }
    }

    /// Poll for jobs until `cancel` fires, then run whatever is still due
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "Job dispatcher started"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(10));

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.drain().await {
                tracing::error!(error = %e, "Job dispatcher pass failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        match self.drain().await {
            Ok(processed) => tracing::info!(processed, "Job dispatcher stopped"),
            Err(e) => tracing::error!(error = %e, "Final job pass failed"),
        }
    }

    /// Run every job that is currently due; returns how many ran
    ///
    /// A rescheduled job is not picked up again in the same pass unless its
    /// backoff is zero.
    pub async fn drain(&self) -> nubcheck_common::Result<usize> {
        let lease_ms = self.config.lease_secs.saturating_mul(1000);
        let mut processed = 0;

        while let Some(job) = self
            .store
            .claim_next_job(Utc::now().timestamp_millis(), lease_ms)
            .await?
        {
            self.process(&job).await?;
            processed += 1;
        }

        Ok(processed)
    }

    async fn process(&self, job: &ClaimedJob) -> nubcheck_common::Result<()> {
        let payload = match job.payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Dropping job with corrupt payload");
                return self
                    .store
                    .fail_job(&job.id, Utc::now().timestamp_millis(), &e.to_string(), &[])
                    .await;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        match self.handle(&payload).await {
            Ok(()) => {
                tracing::debug!(job = %job.idempotency_key, attempts = job.attempts, "Job done");
                self.store.complete_job(&job.id, now_ms).await
            }
            Err(e) => {
                let error = format!("{:#}", e);
                if job.attempts >= self.config.max_attempts {
                    tracing::error!(
                        job = %job.idempotency_key,
                        attempts = job.attempts,
                        error = %error,
                        "Job failed permanently, escalating"
                    );
                    let follow_ups = escalation(&payload, job, &error);
                    self.store.fail_job(&job.id, now_ms, &error, &follow_ups).await
                } else {
                    let delay = backoff_ms(&self.config, job.attempts);
                    tracing::warn!(
                        job = %job.idempotency_key,
                        attempts = job.attempts,
                        retry_in_ms = delay,
                        error = %error,
                        "Job failed, will retry"
                    );
                    self.store
                        .reschedule_job(&job.id, now_ms.saturating_add(delay as i64), &error)
                        .await
                }
            }
        }
    }

    async fn handle(&self, payload: &JobPayload) -> anyhow::Result<()> {
        match payload {
            JobPayload::Classify { prediction_id } => {
                let prediction = self.lifecycle.require(prediction_id).await?;
                if prediction.ai_prediction.is_some() || prediction.is_resolved() {
                    tracing::debug!(prediction_id = %prediction_id, "Skipping classification");
                    return Ok(());
                }
                self.lifecycle.classify(prediction_id).await?;
            }
            JobPayload::ReviewPrompt { prediction_id } => {
                let prediction = self.lifecycle.require(prediction_id).await?;
                if prediction.review_message.is_some() {
                    tracing::debug!(prediction_id = %prediction_id, "Review prompt already posted");
                    return Ok(());
                }
                let message = self
                    .notifier
                    .send_review_prompt(&prediction)
                    .await
                    .context("review prompt")?;
                let posted_open = prediction.final_result.is_none();
                self.store
                    .record_review_prompt(prediction_id, message, posted_open)
                    .await?;
                tracing::info!(
                    prediction_id = %prediction_id,
                    message_id = message.message_id,
                    "Review prompt posted"
                );
            }
            JobPayload::ResultEmail { prediction_id } => {
                let prediction = self.lifecycle.require(prediction_id).await?;
                let result = prediction
                    .final_result
                    .ok_or_else(|| anyhow!("prediction {} is not resolved", prediction_id))?;
                self.notifier
                    .send_result(&prediction, result)
                    .await
                    .context("result email")?;
            }
            JobPayload::UnclearEmail { prediction_id } => {
                let prediction = self.lifecycle.require(prediction_id).await?;
                self.notifier
                    .send_unclear(&prediction)
                    .await
                    .context("unclear email")?;
            }
            JobPayload::Refund { prediction_id } => {
                self.reconciler.execute_refund(prediction_id, Utc::now()).await?;
            }
            JobPayload::ClosePrompt { prediction_id } => {
                let prediction = self.lifecycle.require(prediction_id).await?;
                if let (Some(message), Some(result)) = (prediction.review_message, prediction.final_result) {
                    let original = templates::review_caption(&prediction);
                    self.notifier
                        .close_prompt(message, &original, result)
                        .await
                        .context("close prompt")?;
                }
            }
            JobPayload::Alert { text, .. } => {
                self.notifier.alert(text).await.context("alert")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed(kind: &str, key: &str, attempts: i64) -> ClaimedJob {
        ClaimedJob::for_test(kind, key, attempts)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = JobsConfig {
            backoff_base_ms: 1000,
            backoff_max_ms: 5000,
            ..JobsConfig::default()
        };
        assert_eq!(backoff_ms(&config, 1), 1000);
        assert_eq!(backoff_ms(&config, 2), 2000);
        assert_eq!(backoff_ms(&config, 3), 4000);
        assert_eq!(backoff_ms(&config, 4), 5000);
        assert_eq!(backoff_ms(&config, 60), 5000);
    }

    #[test]
    fn test_failed_classification_still_prompts_review() {
        let payload = JobPayload::Classify {
            prediction_id: "p1".into(),
        };
        let follow_ups = escalation(&payload, &claimed("classify", "classify:p1", 5), "timeout");
        assert_eq!(follow_ups.len(), 2);
        assert_eq!(follow_ups[0].idempotency_key(), "review_prompt:p1");
        assert_eq!(follow_ups[1].idempotency_key(), "alert:job_failed:classify:p1");
    }

    #[test]
    fn test_failed_alert_does_not_alert_again() {
        let payload = JobPayload::alert("k", "text");
        assert!(escalation(&payload, &claimed("alert", "alert:k", 5), "down").is_empty());
    }

    #[test]
    fn test_failed_refund_escalates() {
        let payload = JobPayload::Refund {
            prediction_id: "p9".into(),
        };
        let follow_ups = escalation(&payload, &claimed("refund", "refund:p9", 5), "api error");
        match &follow_ups[..] {
            [JobPayload::Alert { text, .. }] => {
                assert!(text.contains("refund:p9"));
                assert!(text.contains("api error"));
            }
            other => panic!("unexpected follow-ups: {:?}", other),
        }
    }
}
