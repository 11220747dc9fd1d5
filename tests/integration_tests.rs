use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smsflow::prelude::*;
use smsflow_core::{SendRequest, SendResponse};
use smsflow_store::{HistoryQuery, StatusApplied};

/// Transport that records every request and fails for numbers listed in
/// `reject`. Stands in for Twilio so jobs run without network access.
#[derive(Default)]
struct FakeTransport {
    sent: AtomicUsize,
    reject: Vec<String>,
}

#[async_trait]
impl SmsTransport for FakeTransport {
    async fn send(&self, req: SendRequest<'_>) -> Result<SendResponse, TransportError> {
        if self.reject.iter().any(|r| r == req.to) {
            return Err(TransportError::Rejected {
                code: Some("21211".to_string()),
                message: format!("invalid 'To' number {}", req.to),
            });
        }
        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(SendResponse {
            provider_message_id: format!("SM{:032}", n),
            status: MessageStatus::Queued,
            cost: Some(0.0075),
            provider: "fake",
            raw: serde_json::json!({"to": req.to}),
        })
    }
}

async fn engine_with(transport: FakeTransport) -> CampaignEngine {
    let store = SmsStore::open_in_memory().await.unwrap();
    CampaignEngine::new(
        store,
        Arc::new(transport),
        SendLimiter::disabled(),
        EngineConfig {
            from_number: "+15550006000".to_string(),
            max_recipients: 100,
            send_timeout: Duration::from_secs(5),
        },
    )
}

async fn wait_for_terminal(engine: &CampaignEngine, job_id: &str) -> BulkJob {
    for _ in 0..200 {
        let job = engine.get_job_status(job_id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

const ROSTER: &[u8] = b"phone_number,name,code\n\
+15551230001,Alice,A1\n\
+15551230002,Bob,B2\n\
15551230003,Carol,C3\n\
bogus,Dave,D4\n";

#[tokio::test]
async fn test_campaign_end_to_end() {
    let engine = engine_with(FakeTransport::default()).await;

    let report = engine.validate_roster(ROSTER).unwrap();
    assert_eq!(report.recipients.len(), 3);
    assert_eq!(report.invalid_rows.len(), 1);

    let job = engine
        .start_campaign(report.recipients, "Hi {name}, your code is {code}", "roster.csv")
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_count, 3);

    let done = wait_for_terminal(&engine, &job.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent_count, 3);
    assert_eq!(done.failed_count, 0);

    let messages = engine
        .store()
        .history(HistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .any(|m| m.body == "Hi Alice, your code is A1"));
    assert!(messages.iter().all(|m| m.job_id.as_deref() == Some(done.job_id.as_str())));
}

#[tokio::test]
async fn test_campaign_tolerates_per_recipient_failures() {
    let transport = FakeTransport {
        reject: vec!["+15551230002".to_string()],
        ..Default::default()
    };
    let engine = engine_with(transport).await;

    let report = engine.validate_roster(ROSTER).unwrap();
    let job = engine
        .start_campaign(report.recipients, "Hello {name}", "roster.csv")
        .await
        .unwrap();

    let done = wait_for_terminal(&engine, &job.job_id).await;
    assert_eq!(done.status, JobStatus::CompletedWithErrors);
    assert_eq!(done.sent_count, 2);
    assert_eq!(done.failed_count, 1);

    let failed = engine
        .store()
        .history(HistoryQuery {
            status: Some(MessageStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].to_number, "+15551230002");
    assert_eq!(failed[0].error_code.as_deref(), Some("21211"));
}

#[tokio::test]
async fn test_oversized_roster_rejected_before_any_send() {
    let engine = engine_with(FakeTransport::default()).await;

    let mut csv = String::from("phone_number\n");
    for i in 0..101 {
        csv.push_str(&format!("+1555200{i:04}\n"));
    }

    let err = engine.validate_roster(csv.as_bytes()).unwrap_err();
    assert!(matches!(
        err,
        CampaignError::LimitExceeded { count: 101, limit: 100 }
    ));
    assert!(engine.store().list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_callback_flows_into_history_and_stats() {
    let engine = engine_with(FakeTransport::default()).await;
    let ingest = WebhookIngest::new(engine.store().clone());

    let receipt = engine.send_single("+15551230001", "ping").await.unwrap();

    let applied = ingest
        .record_status_update(
            &receipt.provider_message_id,
            MessageStatus::Delivered,
            None,
            None,
            "MessageStatus=delivered".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(applied, StatusApplied::Updated);

    // Redelivery of the same callback is a no-op.
    let again = ingest
        .record_status_update(
            &receipt.provider_message_id,
            MessageStatus::Delivered,
            None,
            None,
            "MessageStatus=delivered".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(again, StatusApplied::Duplicate);

    let stats = engine.store().stats().await.unwrap();
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.total_delivered, 1);
    assert_eq!(stats.today_sent, 1);
    assert_eq!(stats.this_month_sent, 1);
}

#[tokio::test]
async fn test_inbound_recorded_once_per_provider_id() {
    let engine = engine_with(FakeTransport::default()).await;
    let ingest = WebhookIngest::new(engine.store().clone());

    let first = ingest
        .record_inbound(
            "+15551230009",
            "+15550006000",
            "STOP",
            Some("SMinbound0001".to_string()),
            "Body=STOP".to_string(),
        )
        .await
        .unwrap();
    let second = ingest
        .record_inbound(
            "+15551230009",
            "+15550006000",
            "STOP",
            Some("SMinbound0001".to_string()),
            "Body=STOP".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let inbound = engine
        .store()
        .history(HistoryQuery {
            direction: Some(Direction::Inbound),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].body, "STOP");
}

#[tokio::test]
async fn test_concurrent_single_sends() {
    use futures::future;

    let engine = engine_with(FakeTransport::default()).await;

    let sends = (0..10).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .send_single(&format!("+1555123{i:04}"), "hello")
                .await
        }
    });
    let receipts = future::join_all(sends).await;
    assert!(receipts.iter().all(|r| r.is_ok()));

    let messages = engine
        .store()
        .history(HistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(messages.len(), 10);
}
