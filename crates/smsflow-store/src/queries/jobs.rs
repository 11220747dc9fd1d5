//! Bulk job CRUD and counter updates.

use rusqlite::{params, OptionalExtension, Row};
use smsflow_core::{BulkJob, JobStatus};

use crate::database::{map_tr_err, now_rfc3339, parse_rfc3339, Database};
use crate::StoreError;

const JOB_COLUMNS: &str = "job_id, filename, message_template, total_count, \
                           sent_count, failed_count, status, created_at, updated_at";

pub(crate) fn job_from_row(row: &Row<'_>) -> Result<BulkJob, rusqlite::Error> {
    let status: String = row.get(6)?;
    Ok(BulkJob {
        job_id: row.get(0)?,
        filename: row.get(1)?,
        message_template: row.get(2)?,
        total_count: row.get(3)?,
        sent_count: row.get(4)?,
        failed_count: row.get(5)?,
        status: status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_rfc3339(7, row.get(7)?)?,
        updated_at: parse_rfc3339(8, row.get(8)?)?,
    })
}

/// Insert a new job row in `pending` state and return it.
pub async fn create_job(
    db: &Database,
    job_id: &str,
    filename: &str,
    message_template: &str,
    total_count: i64,
) -> Result<BulkJob, StoreError> {
    let job_id = job_id.to_string();
    let filename = filename.to_string();
    let message_template = message_template.to_string();
    let now = now_rfc3339();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO bulk_jobs (job_id, filename, message_template, total_count, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
                params![job_id, filename, message_template, total_count, now],
            )?;
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM bulk_jobs WHERE job_id = ?1"),
                params![job_id],
                job_from_row,
            )
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_job(db: &Database, job_id: &str) -> Result<Option<BulkJob>, StoreError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM bulk_jobs WHERE job_id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// All jobs, newest first.
pub async fn list_jobs(db: &Database) -> Result<Vec<BulkJob>, StoreError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM bulk_jobs ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], job_from_row)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row?);
            }
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

pub(crate) enum TransitionOutcome {
    Done,
    NotFound,
    Illegal(JobStatus),
}

/// Advance the job status, enforcing the forward-only state machine inside
/// a single writer call so no concurrent update can interleave.
pub async fn transition(
    db: &Database,
    job_id: &str,
    next: JobStatus,
) -> Result<(), StoreError> {
    let id = job_id.to_string();
    let now = now_rfc3339();
    let outcome = db
        .connection()
        .call(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM bulk_jobs WHERE job_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(TransitionOutcome::NotFound);
            };
            let current: JobStatus = current.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            if !current.can_transition_to(next) {
                return Ok(TransitionOutcome::Illegal(current));
            }
            conn.execute(
                "UPDATE bulk_jobs SET status = ?2, updated_at = ?3 WHERE job_id = ?1",
                params![id, next.as_str(), now],
            )?;
            Ok(TransitionOutcome::Done)
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        TransitionOutcome::Done => Ok(()),
        TransitionOutcome::NotFound => Err(StoreError::JobNotFound(job_id.to_string())),
        TransitionOutcome::Illegal(from) => Err(StoreError::IllegalTransition { from, to: next }),
    }
}

/// Increment one of the progress counters. The WHERE guard keeps
/// `sent_count + failed_count <= total_count` even under a buggy caller.
pub async fn increment_counter(
    db: &Database,
    job_id: &str,
    sent: bool,
) -> Result<(), StoreError> {
    let id = job_id.to_string();
    let now = now_rfc3339();
    let column = if sent { "sent_count" } else { "failed_count" };
    let sql = format!(
        "UPDATE bulk_jobs SET {column} = {column} + 1, updated_at = ?2
         WHERE job_id = ?1 AND sent_count + failed_count < total_count"
    );
    let updated = db
        .connection()
        .call(move |conn| conn.execute(&sql, params![id, now]).map_err(Into::into))
        .await
        .map_err(map_tr_err)?;
    if updated == 0 {
        return Err(StoreError::JobNotFound(job_id.to_string()));
    }
    Ok(())
}
