//! Prediction store
//!
//! The only module that writes `predictions`, `referral_codes`, `jobs` and
//! `webhook_events`. Callers get named transition functions, never raw field
//! setters. Every conditional transition is a single guarded `UPDATE`, and any
//! side effect it requires is written to the outbox in the same transaction.
//!
//! Transactions always begin with a write so SQLite takes the write lock up
//! front instead of upgrading a read lock mid-transaction.

pub mod outbox;
pub mod predictions;
pub mod referrals;
pub mod webhook_events;

pub use outbox::{ClaimedJob, JobPayload};
pub use predictions::{InsertOutcome, NewPrediction, ResolutionSource, ResolveOutcome};

use chrono::{DateTime, Utc};
use nubcheck_common::{Error, Result};
use sqlx::SqlitePool;

/// Handle to the durable store shared by every trigger
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl Store {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

pub(crate) fn parse_db_time(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_opt_db_time(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_db_time(column, &v)).transpose()
}

/// Open a fresh store in a temporary directory (unit tests)
#[cfg(test)]
pub(crate) async fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = nubcheck_common::db::init_database(&dir.path().join("test.db"))
        .await
        .unwrap();
    (Store::new(pool, 5000), dir)
}
