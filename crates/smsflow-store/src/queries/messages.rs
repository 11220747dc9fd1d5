//! Message rows: insert, lookup, idempotent status application, history.

use rusqlite::{params, OptionalExtension, Row};
use smsflow_core::{Direction, MessageStatus, SmsMessage};

use crate::database::{map_tr_err, now_rfc3339, parse_rfc3339, Database};
use crate::store::{HistoryQuery, NewMessage, StatusApplied};
use crate::StoreError;

const MESSAGE_COLUMNS: &str = "id, job_id, provider_message_id, direction, from_number, \
                               to_number, body, status, cost, error_code, error_message, \
                               created_at, updated_at";

fn text_col<T: std::str::FromStr>(idx: usize, value: String) -> Result<T, rusqlite::Error>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> Result<SmsMessage, rusqlite::Error> {
    Ok(SmsMessage {
        id: row.get(0)?,
        job_id: row.get(1)?,
        provider_message_id: row.get(2)?,
        direction: text_col::<Direction>(3, row.get(3)?)?,
        from_number: row.get(4)?,
        to_number: row.get(5)?,
        body: row.get(6)?,
        status: text_col::<MessageStatus>(7, row.get(7)?)?,
        cost: row.get(8)?,
        error_code: row.get(9)?,
        error_message: row.get(10)?,
        created_at: parse_rfc3339(11, row.get(11)?)?,
        updated_at: parse_rfc3339(12, row.get(12)?)?,
    })
}

/// Insert a message row and return its id.
pub async fn insert_message(db: &Database, msg: NewMessage) -> Result<i64, StoreError> {
    let now = now_rfc3339();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sms_messages (job_id, provider_message_id, direction, from_number,
                                           to_number, body, status, cost, error_code, error_message,
                                           created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    msg.job_id,
                    msg.provider_message_id,
                    msg.direction.as_str(),
                    msg.from_number,
                    msg.to_number,
                    msg.body,
                    msg.status.as_str(),
                    msg.cost,
                    msg.error_code,
                    msg.error_message,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn find_by_provider_id(
    db: &Database,
    provider_message_id: &str,
) -> Result<Option<SmsMessage>, StoreError> {
    let pid = provider_message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM sms_messages WHERE provider_message_id = ?1"),
                params![pid],
                message_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// Apply a delivery status callback. The select-then-update runs inside one
/// writer call, so a duplicate delivery of the same `(id, status)` pair is
/// recognized and dropped rather than re-applied.
pub async fn apply_status_update(
    db: &Database,
    provider_message_id: &str,
    status: MessageStatus,
    error_code: Option<String>,
    error_message: Option<String>,
) -> Result<StatusApplied, StoreError> {
    let pid = provider_message_id.to_string();
    let now = now_rfc3339();
    db.connection()
        .call(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM sms_messages WHERE provider_message_id = ?1",
                    params![pid],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(StatusApplied::Unknown);
            };
            if current == status.as_str() {
                return Ok(StatusApplied::Duplicate);
            }
            conn.execute(
                "UPDATE sms_messages
                 SET status = ?2, error_code = ?3, error_message = ?4, updated_at = ?5
                 WHERE provider_message_id = ?1",
                params![pid, status.as_str(), error_code, error_message, now],
            )?;
            Ok(StatusApplied::Updated)
        })
        .await
        .map_err(map_tr_err)
}

/// Message history, newest first, with optional status/direction filters
/// and limit/offset pagination.
pub async fn history(db: &Database, query: HistoryQuery) -> Result<Vec<SmsMessage>, StoreError> {
    db.connection()
        .call(move |conn| {
            let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM sms_messages");
            let mut clauses: Vec<&str> = Vec::new();
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(status) = query.status {
                clauses.push("status = ?");
                binds.push(Box::new(status.as_str()));
            }
            if let Some(direction) = query.direction {
                clauses.push("direction = ?");
                binds.push(Box::new(direction.as_str()));
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
            binds.push(Box::new(query.limit));
            binds.push(Box::new(query.offset));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(binds), message_from_row)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}
