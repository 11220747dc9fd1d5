//! Campaign orchestration.
//!
//! [`CampaignEngine`] owns the injected collaborators (store, transport,
//! limiter) and drives bulk jobs to completion on a background task. A
//! recipient failure is recorded and tallied, never fatal to the job; only
//! setup-level errors (job row cannot be created, store unavailable
//! mid-run) fail the whole campaign.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use smsflow_core::{
    BulkJob, JobStatus, MessageStatus, Recipient, SendRequest, SmsTransport, TransportError,
};
use smsflow_store::{NewMessage, SmsStore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::limiter::SendLimiter;
use crate::roster::{self, RosterReport};
use crate::template;
use crate::CampaignError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sender identity passed to the transport.
    pub from_number: String,
    /// Whole-upload ceiling; uploads above it are rejected pre-flight.
    pub max_recipients: usize,
    /// Bound on each transport invocation. A timed-out send is a
    /// per-recipient failure, not a stall of the job.
    pub send_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            from_number: String::new(),
            max_recipients: 10_000,
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a single (non-bulk) send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: i64,
    pub provider_message_id: String,
    pub status: MessageStatus,
    pub cost: Option<f64>,
}

/// The campaign engine. Clones share the same store, transport, limiter,
/// and cancellation registry, so one engine instance can serve every
/// endpoint of the process.
#[derive(Clone)]
pub struct CampaignEngine {
    store: SmsStore,
    transport: Arc<dyn SmsTransport>,
    limiter: SendLimiter,
    config: EngineConfig,
    cancel_flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CampaignEngine {
    pub fn new(
        store: SmsStore,
        transport: Arc<dyn SmsTransport>,
        limiter: SendLimiter,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            transport,
            limiter,
            config,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &SmsStore {
        &self.store
    }

    /// Parse and validate an uploaded roster without creating a job.
    pub fn validate_roster(&self, bytes: &[u8]) -> Result<RosterReport, CampaignError> {
        roster::parse_roster(bytes, self.config.max_recipients)
    }

    /// Create a job for the given recipients and start processing it on a
    /// background task. Returns the job snapshot in `pending` state; poll
    /// [`get_job_status`](Self::get_job_status) for progress.
    pub async fn start_campaign(
        &self,
        recipients: Vec<Recipient>,
        message_template: &str,
        filename: &str,
    ) -> Result<BulkJob, CampaignError> {
        if recipients.is_empty() {
            return Err(CampaignError::Validation(
                "no valid phone numbers in upload".to_string(),
            ));
        }
        if recipients.len() > self.config.max_recipients {
            return Err(CampaignError::LimitExceeded {
                count: recipients.len(),
                limit: self.config.max_recipients,
            });
        }

        let job_id = smsflow_core::new_job_id();
        let job = self
            .store
            .create_job(&job_id, filename, message_template, recipients.len() as i64)
            .await?;
        info!(job_id, total = recipients.len(), "campaign accepted");

        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .expect("cancel registry poisoned")
            .insert(job_id.clone(), flag.clone());

        let engine = self.clone();
        let template = message_template.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.run_job(&job_id, recipients, &template, flag).await {
                error!(job_id, error = %e, "campaign aborted");
            }
        });

        Ok(job)
    }

    /// Ask a running job to stop. Already-dispatched sends are not revoked;
    /// no new sends are attempted once the flag is observed. Returns false
    /// when the job is unknown or already finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        let flags = self.cancel_flags.lock().expect("cancel registry poisoned");
        match flags.get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(job_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Current job snapshot; reflects true progress while running.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<BulkJob>, CampaignError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<BulkJob>, CampaignError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Process every recipient of a created job. Sequential, in input
    /// order, so runs are reproducible.
    async fn run_job(
        &self,
        job_id: &str,
        recipients: Vec<Recipient>,
        message_template: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), CampaignError> {
        let result = self
            .run_job_inner(job_id, recipients, message_template, cancel)
            .await;
        self.cancel_flags
            .lock()
            .expect("cancel registry poisoned")
            .remove(job_id);
        if result.is_err() {
            // Store-level failure mid-run: the job is dead, mark it so if
            // the store lets us.
            if let Err(e) = self.store.transition_job(job_id, JobStatus::Failed).await {
                warn!(job_id, error = %e, "could not mark aborted job failed");
            }
        }
        result
    }

    async fn run_job_inner(
        &self,
        job_id: &str,
        recipients: Vec<Recipient>,
        message_template: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), CampaignError> {
        self.store.transition_job(job_id, JobStatus::Running).await?;

        let total = recipients.len();
        let mut sent = 0usize;
        let mut failed = 0usize;
        let mut cancelled = false;

        for (index, recipient) in recipients.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                warn!(job_id, processed = index, total, "job cancelled");
                cancelled = true;
                break;
            }

            let body = template::render(message_template, recipient);
            self.limiter.acquire().await;
            debug!(job_id, seq = index + 1, total, to = %recipient.phone_number, "sending");

            match self.dispatch(&recipient.phone_number, &body).await {
                Ok(response) => {
                    self.store
                        .insert_message(NewMessage::outbound_sent(
                            Some(job_id.to_string()),
                            &self.config.from_number,
                            &recipient.phone_number,
                            &body,
                            response.status,
                            response.provider_message_id,
                            response.cost,
                        ))
                        .await?;
                    self.store.increment_sent(job_id).await?;
                    sent += 1;
                }
                Err(e) => {
                    warn!(job_id, to = %recipient.phone_number, error = %e, "send failed");
                    self.store
                        .insert_message(NewMessage::outbound_failed(
                            Some(job_id.to_string()),
                            &self.config.from_number,
                            &recipient.phone_number,
                            &body,
                            e.code().map(str::to_string),
                            e.to_string(),
                        ))
                        .await?;
                    self.store.increment_failed(job_id).await?;
                    failed += 1;
                }
            }
        }

        let terminal = if cancelled {
            // Partial completion; unattempted recipients stay unaccounted.
            JobStatus::CompletedWithErrors
        } else if failed == total && total > 0 {
            // Nothing got through at all: the batch never effectively
            // started (transport unreachable or rejecting everything).
            JobStatus::Failed
        } else if failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        self.store.transition_job(job_id, terminal).await?;
        info!(job_id, sent, failed, status = %terminal, "campaign finished");
        Ok(())
    }

    /// One rate-limited, deadline-bounded transport invocation.
    async fn dispatch(&self, to: &str, body: &str) -> Result<smsflow_core::SendResponse, TransportError> {
        let request = SendRequest {
            to,
            from: &self.config.from_number,
            body,
        };
        match timeout(self.config.send_timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
        }
    }

    /// Single send outside any job. Shares the process-wide limiter with
    /// bulk campaigns.
    pub async fn send_single(&self, to: &str, body: &str) -> Result<SendReceipt, CampaignError> {
        let to = roster::normalize_phone(to).map_err(CampaignError::Validation)?;
        if body.trim().is_empty() {
            return Err(CampaignError::Validation(
                "message body cannot be empty".to_string(),
            ));
        }

        self.limiter.acquire().await;
        match self.dispatch(&to, body).await {
            Ok(response) => {
                let message_id = self
                    .store
                    .insert_message(NewMessage::outbound_sent(
                        None,
                        &self.config.from_number,
                        &to,
                        body,
                        response.status,
                        response.provider_message_id.clone(),
                        response.cost,
                    ))
                    .await?;
                Ok(SendReceipt {
                    message_id,
                    provider_message_id: response.provider_message_id,
                    status: response.status,
                    cost: response.cost,
                })
            }
            Err(e) => {
                self.store
                    .insert_message(NewMessage::outbound_failed(
                        None,
                        &self.config.from_number,
                        &to,
                        body,
                        e.code().map(str::to_string),
                        e.to_string(),
                    ))
                    .await?;
                Err(CampaignError::Transport(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use smsflow_core::SendResponse;
    use smsflow_store::HistoryQuery;
    use std::sync::atomic::AtomicUsize;

    /// Transport scripted to fail on specific 1-based call numbers, or to
    /// hang forever when `hang` is set.
    struct ScriptedTransport {
        fail_on: Vec<usize>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn ok() -> Self {
            Self {
                fail_on: Vec::new(),
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn hanging() -> Self {
            Self {
                fail_on: Vec::new(),
                hang: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SmsTransport for ScriptedTransport {
        async fn send(&self, _req: SendRequest<'_>) -> Result<SendResponse, TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&n) {
                return Err(TransportError::Rejected {
                    code: Some("21610".to_string()),
                    message: "blocked recipient".to_string(),
                });
            }
            Ok(SendResponse {
                provider_message_id: format!("SM{n}"),
                status: MessageStatus::Sent,
                cost: Some(0.0075),
                provider: "scripted",
                raw: serde_json::json!({}),
            })
        }
    }

    async fn engine_with(transport: ScriptedTransport) -> CampaignEngine {
        let store = SmsStore::open_in_memory().await.unwrap();
        CampaignEngine::new(
            store,
            Arc::new(transport),
            SendLimiter::disabled(),
            EngineConfig {
                from_number: "+15550009999".to_string(),
                max_recipients: 100,
                send_timeout: Duration::from_secs(5),
            },
        )
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| {
                Recipient::new(format!("+1555000{:04}", i))
                    .with_field("name", format!("r{i}"))
            })
            .collect()
    }

    #[tokio::test]
    async fn clean_run_completes_with_full_counts() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        let flag = Arc::new(AtomicBool::new(false));
        let job = engine
            .store
            .create_job("job-ok", "list.csv", "Hi {name}!", 3)
            .await
            .unwrap();
        engine
            .run_job(&job.job_id, recipients(3), "Hi {name}!", flag)
            .await
            .unwrap();

        let job = engine.get_job_status("job-ok").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.sent_count, 3);
        assert_eq!(job.failed_count, 0);
        assert_eq!(job.sent_count + job.failed_count, job.total_count);
    }

    #[tokio::test]
    async fn single_failure_does_not_abort_job() {
        let engine = engine_with(ScriptedTransport::failing_on(vec![3])).await;
        let flag = Arc::new(AtomicBool::new(false));
        engine
            .store
            .create_job("job-pf", "list.csv", "hello", 5)
            .await
            .unwrap();
        engine
            .run_job("job-pf", recipients(5), "hello", flag)
            .await
            .unwrap();

        let job = engine.get_job_status("job-pf").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::CompletedWithErrors);
        assert_eq!(job.sent_count, 4);
        assert_eq!(job.failed_count, 1);

        let failed = engine
            .store
            .history(HistoryQuery {
                status: Some(MessageStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id.as_deref(), Some("job-pf"));
        assert_eq!(failed[0].error_code.as_deref(), Some("21610"));
    }

    #[tokio::test]
    async fn total_rejection_marks_job_failed() {
        let engine = engine_with(ScriptedTransport::failing_on(vec![1, 2, 3])).await;
        let flag = Arc::new(AtomicBool::new(false));
        engine
            .store
            .create_job("job-dead", "list.csv", "x", 3)
            .await
            .unwrap();
        engine
            .run_job("job-dead", recipients(3), "x", flag)
            .await
            .unwrap();

        let job = engine.get_job_status("job-dead").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_count, 3);
    }

    #[tokio::test]
    async fn empty_roster_is_rejected_preflight() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        let err = engine
            .start_campaign(Vec::new(), "hello", "empty.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_remaining_sends() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        engine
            .store
            .create_job("job-c", "list.csv", "x", 4)
            .await
            .unwrap();
        let flag = Arc::new(AtomicBool::new(true)); // cancelled before first send
        engine
            .run_job("job-c", recipients(4), "x", flag)
            .await
            .unwrap();

        let job = engine.get_job_status("job-c").await.unwrap().unwrap();
        assert!(job.status.is_terminal());
        assert_eq!(job.sent_count, 0);
        assert_eq!(job.failed_count, 0);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_a_noop() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        assert!(!engine.cancel("no-such-job"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_send_is_a_per_recipient_failure() {
        let store = SmsStore::open_in_memory().await.unwrap();
        let engine = CampaignEngine::new(
            store,
            Arc::new(ScriptedTransport::hanging()),
            SendLimiter::disabled(),
            EngineConfig {
                from_number: "+15550009999".to_string(),
                max_recipients: 100,
                send_timeout: Duration::from_millis(100),
            },
        );
        engine
            .store
            .create_job("job-to", "list.csv", "x", 1)
            .await
            .unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        engine
            .run_job("job-to", recipients(1), "x", flag)
            .await
            .unwrap();

        let job = engine.get_job_status("job-to").await.unwrap().unwrap();
        assert_eq!(job.failed_count, 1);
        let messages = engine.store.history(HistoryQuery::default()).await.unwrap();
        assert!(messages[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn start_campaign_runs_in_background() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        let job = engine
            .start_campaign(recipients(2), "Hi {name}!", "list.csv")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_count, 2);

        // Poll until the background task finishes.
        let mut snapshot = None;
        for _ in 0..100 {
            let job = engine.get_job_status(&job.job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                snapshot = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let job = snapshot.expect("job should finish");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.sent_count, 2);
    }

    #[tokio::test]
    async fn send_single_persists_and_reports() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        let receipt = engine
            .send_single("+1 (555) 000-1111", "hello there")
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "SM1");
        assert_eq!(receipt.status, MessageStatus::Sent);

        let messages = engine.store.history(HistoryQuery::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to_number, "+15550001111");
        assert!(messages[0].job_id.is_none());
    }

    #[tokio::test]
    async fn send_single_rejects_bad_number() {
        let engine = engine_with(ScriptedTransport::ok()).await;
        let err = engine.send_single("12345", "hello").await.unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
        // Nothing persisted for a pre-flight rejection.
        let messages = engine.store.history(HistoryQuery::default()).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn send_single_records_transport_failure() {
        let engine = engine_with(ScriptedTransport::failing_on(vec![1])).await;
        let err = engine
            .send_single("+15550001111", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Transport(_)));
        let messages = engine.store.history(HistoryQuery::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
    }
}
