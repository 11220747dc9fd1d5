//! Webhook audit log. Every received payload is persisted before any
//! message row is touched.

use rusqlite::params;

use crate::database::{map_tr_err, now_rfc3339, Database};
use crate::StoreError;

/// Record a raw webhook payload. Returns the log row id.
pub async fn insert_log(
    db: &Database,
    provider_message_id: Option<String>,
    webhook_type: &str,
    payload: String,
) -> Result<i64, StoreError> {
    let webhook_type = webhook_type.to_string();
    let now = now_rfc3339();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_logs (provider_message_id, webhook_type, payload, processed, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![provider_message_id, webhook_type, payload, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Flip the processed flag once the payload has been applied.
pub async fn mark_processed(db: &Database, log_id: i64) -> Result<(), StoreError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhook_logs SET processed = 1 WHERE id = ?1",
                params![log_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
