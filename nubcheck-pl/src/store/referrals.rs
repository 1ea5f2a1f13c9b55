//! Referral code accounting
//!
//! Uses and commission are incremented by the store itself
//! (`uses_count = uses_count + 1`), never computed by the caller, so concurrent
//! sales on the same code cannot lose updates.

use chrono::{DateTime, Utc};
use nubcheck_common::db::retry_on_lock;
use nubcheck_common::{Error, ReferralCode, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{parse_db_time, to_db_time, Store};

/// Credit one attributed sale inside an open transaction
///
/// Unknown and inactive codes are ignored. Returns whether a code was credited.
pub(crate) async fn credit_sale_in(conn: &mut SqliteConnection, code: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE referral_codes
        SET uses_count = uses_count + 1,
            total_commission_owed = total_commission_owed + commission_per_sale
        WHERE code = ? AND is_active = 1
        "#,
    )
    .bind(code)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        tracing::info!(referral_code = %code, "Referral code unknown or inactive, not credited");
        return Ok(false);
    }
    Ok(true)
}

fn referral_from_row(row: &SqliteRow) -> Result<ReferralCode> {
    let created_at: String = row.try_get("created_at")?;
    Ok(ReferralCode {
        code: row.try_get("code")?,
        influencer_name: row.try_get("influencer_name")?,
        is_active: row.try_get("is_active")?,
        commission_per_sale: row.try_get("commission_per_sale")?,
        uses_count: row.try_get("uses_count")?,
        total_commission_owed: row.try_get("total_commission_owed")?,
        total_commission_paid: row.try_get("total_commission_paid")?,
        created_at: parse_db_time("created_at", &created_at)?,
    })
}

impl Store {
    /// Create a referral code; `Error::InvalidInput` if it already exists
    pub async fn create_referral_code(
        &self,
        code: &str,
        influencer_name: &str,
        commission_per_sale: i64,
        now: DateTime<Utc>,
    ) -> Result<ReferralCode> {
        let pool = &self.pool;
        let created_at = to_db_time(now);
        let created_at = created_at.as_str();

        let inserted = retry_on_lock("create_referral_code", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO referral_codes (code, influencer_name, is_active, commission_per_sale, created_at)
                VALUES (?, ?, 1, ?, ?)
                ON CONFLICT(code) DO NOTHING
                "#,
            )
            .bind(code)
            .bind(influencer_name)
            .bind(commission_per_sale)
            .bind(created_at)
            .execute(pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await?;

        if !inserted {
            return Err(Error::InvalidInput(format!(
                "Referral code already exists: {}",
                code
            )));
        }

        self.get_referral_code(code)
            .await?
            .ok_or_else(|| Error::Internal(format!("Referral code {} vanished", code)))
    }

    pub async fn get_referral_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        let row = sqlx::query(
            r#"
            SELECT code, influencer_name, is_active, commission_per_sale, uses_count,
                   total_commission_owed, total_commission_paid, created_at
            FROM referral_codes WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(referral_from_row).transpose()
    }

    pub async fn list_referral_codes(&self) -> Result<Vec<ReferralCode>> {
        let rows = sqlx::query(
            r#"
            SELECT code, influencer_name, is_active, commission_per_sale, uses_count,
                   total_commission_owed, total_commission_paid, created_at
            FROM referral_codes ORDER BY created_at DESC, code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(referral_from_row).collect()
    }

    /// Credit one sale outside of ingest
    pub async fn credit_sale(&self, code: &str) -> Result<bool> {
        let pool = &self.pool;
        retry_on_lock("credit_sale", self.max_lock_wait_ms, || async move {
            let mut conn = pool.acquire().await?;
            credit_sale_in(&mut conn, code).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn test_credit_accumulates_commission() {
        let (store, _dir) = test_store().await;
        store
            .create_referral_code("MUMS10", "Jo", 250, Utc::now())
            .await
            .unwrap();

        assert!(store.credit_sale("MUMS10").await.unwrap());
        assert!(store.credit_sale("MUMS10").await.unwrap());

        let code = store.get_referral_code("MUMS10").await.unwrap().unwrap();
        assert_eq!(code.uses_count, 2);
        assert_eq!(code.total_commission_owed, 500);
        assert_eq!(code.total_commission_paid, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_codes_ignored() {
        let (store, _dir) = test_store().await;
        assert!(!store.credit_sale("NOPE").await.unwrap());

        store
            .create_referral_code("OLD", "Sam", 100, Utc::now())
            .await
            .unwrap();
        sqlx::query("UPDATE referral_codes SET is_active = 0 WHERE code = 'OLD'")
            .execute(store.pool())
            .await
            .unwrap();
        assert!(!store.credit_sale("OLD").await.unwrap());
        assert_eq!(
            store.get_referral_code("OLD").await.unwrap().unwrap().uses_count,
            0
        );
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let (store, _dir) = test_store().await;
        store
            .create_referral_code("DUP", "A", 100, Utc::now())
            .await
            .unwrap();
        let err = store
            .create_referral_code("DUP", "B", 100, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.list_referral_codes().await.unwrap().len(), 1);
    }
}
