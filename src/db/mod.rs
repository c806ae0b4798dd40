//! Database connection pool, schema bootstrap, and health check.
//!
//! Shared SQLite connection pool used by the queue repository and the
//! submission store. WAL mode for concurrent worker writes.

pub mod items;

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::Result;

/// Idempotent schema. Applied on every connect; safe against an existing
/// database because everything is IF NOT EXISTS.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS queue_items (
        id              TEXT PRIMARY KEY,
        submission_id   TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'pending',
        priority        INTEGER NOT NULL DEFAULT 0,
        retry_count     INTEGER NOT NULL DEFAULT 0,
        error_message   TEXT,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_items_eligible
        ON queue_items(priority DESC, created_at ASC)
        WHERE status IN ('pending', 'failed')",
    "CREATE INDEX IF NOT EXISTS idx_items_status ON queue_items(status)",
    "CREATE TABLE IF NOT EXISTS submissions (
        id              TEXT PRIMARY KEY,
        audio_path      TEXT NOT NULL,
        submitted_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS assessment_results (
        submission_id       TEXT PRIMARY KEY REFERENCES submissions(id),
        level               TEXT NOT NULL,
        analysis            TEXT NOT NULL,
        strengths           TEXT NOT NULL,
        improvements        TEXT NOT NULL,
        justification       TEXT NOT NULL,
        multiple_speakers   INTEGER NOT NULL DEFAULT 0,
        scored_at           TEXT NOT NULL
    )",
];

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) the database and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool (for submodules).
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
