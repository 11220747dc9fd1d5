//! High-level store accessor used by the campaign engine and the HTTP
//! surface.

use serde::{Deserialize, Serialize};
use smsflow_core::{BulkJob, Direction, JobStatus, MessageStatus, SmsMessage};
use time::OffsetDateTime;
use tracing::debug;

use crate::database::Database;
use crate::queries;
use crate::StoreError;

/// Fields of a message row at creation time; ids and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub job_id: Option<String>,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub cost: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl NewMessage {
    /// Outbound row for a transport-accepted send.
    pub fn outbound_sent(
        job_id: Option<String>,
        from: &str,
        to: &str,
        body: &str,
        status: MessageStatus,
        provider_message_id: String,
        cost: Option<f64>,
    ) -> Self {
        Self {
            job_id,
            direction: Direction::Outbound,
            from_number: from.to_string(),
            to_number: to.to_string(),
            body: body.to_string(),
            status,
            provider_message_id: Some(provider_message_id),
            cost,
            error_code: None,
            error_message: None,
        }
    }

    /// Outbound row for a send the transport rejected.
    pub fn outbound_failed(
        job_id: Option<String>,
        from: &str,
        to: &str,
        body: &str,
        error_code: Option<String>,
        error_message: String,
    ) -> Self {
        Self {
            job_id,
            direction: Direction::Outbound,
            from_number: from.to_string(),
            to_number: to.to_string(),
            body: body.to_string(),
            status: MessageStatus::Failed,
            provider_message_id: None,
            cost: None,
            error_code,
            error_message: Some(error_message),
        }
    }

    pub fn inbound(from: &str, to: &str, body: &str, provider_message_id: Option<String>) -> Self {
        Self {
            job_id: None,
            direction: Direction::Inbound,
            from_number: from.to_string(),
            to_number: to.to_string(),
            body: body.to_string(),
            status: MessageStatus::Received,
            provider_message_id,
            cost: None,
            error_code: None,
            error_message: None,
        }
    }
}

/// History filter and pagination. Defaults mirror the HTTP surface:
/// newest 50 messages.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub status: Option<MessageStatus>,
    pub direction: Option<Direction>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            status: None,
            direction: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmsStats {
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub total_cost: f64,
    pub today_sent: i64,
    pub this_month_sent: i64,
}

/// Outcome of applying a status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusApplied {
    /// The message row changed.
    Updated,
    /// Same status already recorded; the callback was a redelivery.
    Duplicate,
    /// No message with that provider id.
    Unknown,
}

/// Store accessor over the single-writer database. Cheap to clone.
#[derive(Clone)]
pub struct SmsStore {
    db: Database,
}

impl SmsStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(path).await?,
        })
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open_in_memory().await?,
        })
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.db.close().await
    }

    // --- Job operations ---

    pub async fn create_job(
        &self,
        job_id: &str,
        filename: &str,
        message_template: &str,
        total_count: i64,
    ) -> Result<BulkJob, StoreError> {
        let job =
            queries::jobs::create_job(&self.db, job_id, filename, message_template, total_count)
                .await?;
        debug!(job_id, total_count, "bulk job created");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<BulkJob>, StoreError> {
        queries::jobs::get_job(&self.db, job_id).await
    }

    pub async fn require_job(&self, job_id: &str) -> Result<BulkJob, StoreError> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self) -> Result<Vec<BulkJob>, StoreError> {
        queries::jobs::list_jobs(&self.db).await
    }

    /// Forward-only status transition; rejects anything the state machine
    /// does not allow.
    pub async fn transition_job(&self, job_id: &str, next: JobStatus) -> Result<(), StoreError> {
        queries::jobs::transition(&self.db, job_id, next).await
    }

    pub async fn increment_sent(&self, job_id: &str) -> Result<(), StoreError> {
        queries::jobs::increment_counter(&self.db, job_id, true).await
    }

    pub async fn increment_failed(&self, job_id: &str) -> Result<(), StoreError> {
        queries::jobs::increment_counter(&self.db, job_id, false).await
    }

    // --- Message operations ---

    pub async fn insert_message(&self, msg: NewMessage) -> Result<i64, StoreError> {
        queries::messages::insert_message(&self.db, msg).await
    }

    pub async fn find_message_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<SmsMessage>, StoreError> {
        queries::messages::find_by_provider_id(&self.db, provider_message_id).await
    }

    pub async fn apply_status_update(
        &self,
        provider_message_id: &str,
        status: MessageStatus,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> Result<StatusApplied, StoreError> {
        queries::messages::apply_status_update(
            &self.db,
            provider_message_id,
            status,
            error_code,
            error_message,
        )
        .await
    }

    pub async fn history(&self, query: HistoryQuery) -> Result<Vec<SmsMessage>, StoreError> {
        queries::messages::history(&self.db, query).await
    }

    pub async fn stats(&self) -> Result<SmsStats, StoreError> {
        let now = OffsetDateTime::now_utc();
        let today = format!(
            "{:04}-{:02}-{:02}",
            now.year(),
            u8::from(now.month()),
            now.day()
        );
        let month = format!("{:04}-{:02}", now.year(), u8::from(now.month()));
        queries::stats::gather(&self.db, today, month).await
    }

    // --- Webhook log ---

    pub async fn log_webhook(
        &self,
        provider_message_id: Option<String>,
        webhook_type: &str,
        payload: String,
    ) -> Result<i64, StoreError> {
        queries::webhooks::insert_log(&self.db, provider_message_id, webhook_type, payload).await
    }

    pub async fn mark_webhook_processed(&self, log_id: i64) -> Result<(), StoreError> {
        queries::webhooks::mark_processed(&self.db, log_id).await
    }
}
