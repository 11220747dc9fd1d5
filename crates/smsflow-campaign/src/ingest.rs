//! Webhook-driven bookkeeping.
//!
//! Provider callbacks are modeled as explicit entry points rather than an
//! implicit listener: the HTTP layer parses the payload and calls
//! [`WebhookIngest::record_status_update`] or
//! [`WebhookIngest::record_inbound`]. Both are idempotent under duplicate
//! delivery. Every payload is logged before any message row is touched.

use smsflow_core::MessageStatus;
use smsflow_store::{NewMessage, SmsStore, StatusApplied};
use tracing::{debug, info, warn};

use crate::CampaignError;

#[derive(Clone)]
pub struct WebhookIngest {
    store: SmsStore,
}

impl WebhookIngest {
    pub fn new(store: SmsStore) -> Self {
        Self { store }
    }

    /// Apply an asynchronous delivery status update. Duplicate deliveries
    /// of the same `(provider_message_id, status)` pair are dropped; job
    /// counters are never touched here (they tally enqueue outcomes, not
    /// delivery refinements).
    pub async fn record_status_update(
        &self,
        provider_message_id: &str,
        status: MessageStatus,
        error_code: Option<String>,
        error_message: Option<String>,
        raw_payload: String,
    ) -> Result<StatusApplied, CampaignError> {
        let log_id = self
            .store
            .log_webhook(
                Some(provider_message_id.to_string()),
                "status_callback",
                raw_payload,
            )
            .await?;

        let applied = self
            .store
            .apply_status_update(provider_message_id, status, error_code, error_message)
            .await?;

        match applied {
            StatusApplied::Updated => {
                debug!(provider_message_id, status = %status, "status update applied");
                self.store.mark_webhook_processed(log_id).await?;
            }
            StatusApplied::Duplicate => {
                debug!(provider_message_id, status = %status, "duplicate status update dropped");
                self.store.mark_webhook_processed(log_id).await?;
            }
            StatusApplied::Unknown => {
                warn!(provider_message_id, "status update for unknown message");
            }
        }
        Ok(applied)
    }

    /// Store an incoming message event.
    pub async fn record_inbound(
        &self,
        from: &str,
        to: &str,
        body: &str,
        provider_message_id: Option<String>,
        raw_payload: String,
    ) -> Result<i64, CampaignError> {
        let log_id = self
            .store
            .log_webhook(provider_message_id.clone(), "incoming_message", raw_payload)
            .await?;

        // Redelivered inbound events carry the same provider id; skip the
        // second insert instead of storing the message twice.
        if let Some(pid) = provider_message_id.as_deref() {
            if let Some(existing) = self.store.find_message_by_provider_id(pid).await? {
                debug!(provider_message_id = pid, "duplicate inbound dropped");
                self.store.mark_webhook_processed(log_id).await?;
                return Ok(existing.id);
            }
        }

        let message_id = self
            .store
            .insert_message(NewMessage::inbound(from, to, body, provider_message_id))
            .await?;
        self.store.mark_webhook_processed(log_id).await?;
        info!(from, to, message_id, "inbound message recorded");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsflow_core::{Direction, JobStatus};
    use smsflow_store::HistoryQuery;

    async fn ingest_with_store() -> (WebhookIngest, SmsStore) {
        let store = SmsStore::open_in_memory().await.unwrap();
        (WebhookIngest::new(store.clone()), store)
    }

    #[tokio::test]
    async fn duplicate_status_update_has_no_further_effect() {
        let (ingest, store) = ingest_with_store().await;
        store
            .insert_message(NewMessage::outbound_sent(
                None,
                "+15550009999",
                "+15550001111",
                "hi",
                MessageStatus::Sent,
                "SM1".to_string(),
                None,
            ))
            .await
            .unwrap();

        let first = ingest
            .record_status_update(
                "SM1",
                MessageStatus::Delivered,
                None,
                None,
                "payload".to_string(),
            )
            .await
            .unwrap();
        let second = ingest
            .record_status_update(
                "SM1",
                MessageStatus::Delivered,
                None,
                None,
                "payload".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(first, StatusApplied::Updated);
        assert_eq!(second, StatusApplied::Duplicate);
    }

    #[tokio::test]
    async fn status_updates_never_change_job_counts() {
        let (ingest, store) = ingest_with_store().await;
        store
            .create_job("job-1", "list.csv", "x", 1)
            .await
            .unwrap();
        store.transition_job("job-1", JobStatus::Running).await.unwrap();
        store
            .insert_message(NewMessage::outbound_sent(
                Some("job-1".to_string()),
                "+15550009999",
                "+15550001111",
                "hi",
                MessageStatus::Sent,
                "SM1".to_string(),
                None,
            ))
            .await
            .unwrap();
        store.increment_sent("job-1").await.unwrap();

        for _ in 0..3 {
            ingest
                .record_status_update(
                    "SM1",
                    MessageStatus::Failed,
                    Some("30005".to_string()),
                    Some("unknown destination".to_string()),
                    "payload".to_string(),
                )
                .await
                .unwrap();
        }

        let job = store.require_job("job-1").await.unwrap();
        assert_eq!(job.sent_count, 1);
        assert_eq!(job.failed_count, 0);
        let msg = store
            .find_message_by_provider_id("SM1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.error_code.as_deref(), Some("30005"));
    }

    #[tokio::test]
    async fn unknown_message_update_is_reported() {
        let (ingest, _store) = ingest_with_store().await;
        let applied = ingest
            .record_status_update(
                "SM-nope",
                MessageStatus::Delivered,
                None,
                None,
                "payload".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(applied, StatusApplied::Unknown);
    }

    #[tokio::test]
    async fn inbound_messages_are_stored_once() {
        let (ingest, store) = ingest_with_store().await;
        let first = ingest
            .record_inbound(
                "+15550001111",
                "+15550009999",
                "STOP",
                Some("SMin".to_string()),
                "payload".to_string(),
            )
            .await
            .unwrap();
        let second = ingest
            .record_inbound(
                "+15550001111",
                "+15550009999",
                "STOP",
                Some("SMin".to_string()),
                "payload".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        let inbound = store
            .history(HistoryQuery {
                direction: Some(Direction::Inbound),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].status, MessageStatus::Received);
        assert_eq!(inbound[0].body, "STOP");
    }
}
