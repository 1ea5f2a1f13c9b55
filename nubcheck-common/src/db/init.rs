//! Database initialization
//!
//! Opens (or creates) the SQLite store and idempotently creates every table.
//! The store is the single synchronization point between triggers, so each
//! connection gets WAL journaling and a busy timeout.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas set here apply to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_predictions_table(pool).await?;
    create_referral_codes_table(pool).await?;
    create_jobs_table(pool).await?;
    create_webhook_events_table(pool).await?;
    Ok(())
}

async fn create_predictions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            checkout_session_id TEXT NOT NULL UNIQUE,
            payment_intent_id TEXT,
            payment_confirmed_via_webhook INTEGER NOT NULL DEFAULT 0,
            amount_paid INTEGER,
            customer_email TEXT NOT NULL,
            image_ref TEXT NOT NULL,
            referral_code TEXT,
            ai_prediction TEXT
                CHECK (ai_prediction IN ('boy', 'girl', 'unclear', 'invalid')),
            ai_confidence REAL
                CHECK (ai_confidence >= 0 AND ai_confidence <= 100),
            ai_raw_response TEXT,
            manual_review_result TEXT
                CHECK (manual_review_result IN ('boy', 'girl', 'unclear')),
            final_result TEXT
                CHECK (final_result IN ('boy', 'girl', 'unclear')),
            reviewed_at TEXT,
            result_sent_at TEXT,
            refund_requested_at TEXT,
            refund_processed_at TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sent', 'refunded', 'payment_failed')),
            review_chat_id INTEGER,
            review_message_id INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_predictions_payment_intent ON predictions(payment_intent_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_created_at ON predictions(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_referral_codes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referral_codes (
            code TEXT PRIMARY KEY,
            influencer_name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            commission_per_sale INTEGER NOT NULL DEFAULT 0
                CHECK (commission_per_sale >= 0),
            uses_count INTEGER NOT NULL DEFAULT 0,
            total_commission_owed INTEGER NOT NULL DEFAULT 0,
            total_commission_paid INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    // Transactional outbox: rows are written in the same transaction as the
    // state change that requires them. Times are unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            next_attempt_at INTEGER NOT NULL,
            locked_until INTEGER,
            processed_at INTEGER,
            failed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_due
        ON jobs(next_attempt_at)
        WHERE processed_at IS NULL AND failed_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_webhook_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            received_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
