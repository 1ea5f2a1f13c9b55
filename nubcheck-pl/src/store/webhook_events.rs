//! Payment webhook delivery log

use chrono::{DateTime, Utc};
use nubcheck_common::db::retry_on_lock;
use nubcheck_common::Result;

use super::{to_db_time, Store};

impl Store {
    /// Record a processed delivery; false when the event id was seen before
    pub async fn record_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let pool = &self.pool;
        let received_at = to_db_time(now);
        let received_at = received_at.as_str();

        retry_on_lock("record_webhook_event", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO webhook_events (event_id, event_type, received_at)
                VALUES (?, ?, ?)
                ON CONFLICT(event_id) DO NOTHING
                "#,
            )
            .bind(event_id)
            .bind(event_type)
            .bind(received_at)
            .execute(pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_store;
    use chrono::Utc;

    #[tokio::test]
    async fn test_replayed_event_detected() {
        let (store, _dir) = test_store().await;
        assert!(store
            .record_webhook_event("evt_1", "charge.refunded", Utc::now())
            .await
            .unwrap());
        assert!(!store
            .record_webhook_event("evt_1", "charge.refunded", Utc::now())
            .await
            .unwrap());
    }
}
