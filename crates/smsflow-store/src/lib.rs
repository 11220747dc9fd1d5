//! SQLite persistence for smsflow jobs, messages, and webhook logs.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread, which makes the job counter increments safe without any
//! application-level locking. Query modules accept `&Database` and call
//! through `conn.call()`.

pub mod database;
pub mod queries;
mod store;

pub use database::Database;
pub use store::{HistoryQuery, NewMessage, SmsStats, SmsStore, StatusApplied};

use smsflow_core::JobStatus;

/// Errors surfaced by the store accessor. `Persistence` is fatal to the
/// operation in progress; the campaign engine marks the job `failed` when
/// it sees one mid-run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("illegal job transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}
