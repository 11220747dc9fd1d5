//! Database connection management: PRAGMA setup, WAL mode, schema bootstrap.
//!
//! Do NOT create additional `Connection` instances for writes; the single
//! background thread owned by [`Database`] is the writer.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::StoreError;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS bulk_jobs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id              TEXT NOT NULL UNIQUE,
    filename            TEXT NOT NULL,
    message_template    TEXT NOT NULL,
    total_count         INTEGER NOT NULL,
    sent_count          INTEGER NOT NULL DEFAULT 0,
    failed_count        INTEGER NOT NULL DEFAULT 0,
    status              TEXT NOT NULL DEFAULT 'pending',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sms_messages (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id              TEXT,
    provider_message_id TEXT UNIQUE,
    direction           TEXT NOT NULL,
    from_number         TEXT NOT NULL,
    to_number           TEXT NOT NULL,
    body                TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'queued',
    cost                REAL,
    error_code          TEXT,
    error_message       TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_job ON sms_messages(job_id);
CREATE INDEX IF NOT EXISTS idx_messages_created ON sms_messages(created_at);

CREATE TABLE IF NOT EXISTS webhook_logs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_message_id TEXT,
    webhook_type        TEXT NOT NULL,
    payload             TEXT NOT NULL,
    processed           INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);
"#;

/// Handle to the single-writer SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| map_tr_err(e.into()))?;
        let db = Self { conn };
        db.bootstrap().await?;
        debug!(path, "sqlite store opened");
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| map_tr_err(e.into()))?;
        let db = Self { conn };
        db.bootstrap().await?;
        Ok(db)
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and release the writer.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

pub(crate) fn map_tr_err(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}

/// Timestamps are stored as RFC 3339 UTC strings so that lexicographic
/// ordering matches chronological ordering.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

pub(crate) fn parse_rfc3339(
    idx: usize,
    value: String,
) -> Result<OffsetDateTime, rusqlite::Error> {
    OffsetDateTime::parse(&value, &Rfc3339).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}
