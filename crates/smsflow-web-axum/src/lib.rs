//! Axum HTTP surface over the campaign engine. Thin adapters only: every
//! handler parses the request, delegates to `smsflow-campaign` or the
//! store, and serializes the result.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smsflow_campaign::{CampaignEngine, CampaignError, WebhookIngest};
use smsflow_core::{Direction, MessageStatus};
use smsflow_store::HistoryQuery;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub engine: CampaignEngine,
    pub ingest: WebhookIngest,
}

impl AppState {
    pub fn new(engine: CampaignEngine) -> Self {
        let ingest = WebhookIngest::new(engine.store().clone());
        Self { engine, ingest }
    }
}

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sms/send", post(send_sms))
        .route("/api/sms/bulk", post(send_bulk))
        .route("/api/sms/validate", post(validate_csv))
        .route("/api/sms/history", get(history))
        .route("/api/sms/jobs", get(list_jobs))
        .route("/api/sms/jobs/{job_id}", get(job_status))
        .route("/api/sms/jobs/{job_id}/cancel", post(cancel_job))
        .route("/api/sms/stats", get(stats))
        .route("/api/webhooks/status", post(webhook_status))
        .route("/api/webhooks/incoming", post(webhook_incoming))
        .with_state(state)
}

/// API error envelope. Maps the campaign taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<CampaignError> for ApiError {
    fn from(e: CampaignError) -> Self {
        let status = match &e {
            CampaignError::Validation(_) | CampaignError::LimitExceeded { .. } => {
                StatusCode::BAD_REQUEST
            }
            CampaignError::Transport(_) => StatusCode::BAD_GATEWAY,
            CampaignError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub to_number: String,
    pub message_body: String,
}

#[derive(Debug, Serialize)]
pub struct SendReply {
    pub success: bool,
    pub message_sid: String,
    pub status: MessageStatus,
    pub cost: Option<f64>,
}

async fn send_sms(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Result<Json<SendReply>, ApiError> {
    let receipt = state
        .engine
        .send_single(&body.to_number, &body.message_body)
        .await?;
    Ok(Json(SendReply {
        success: true,
        message_sid: receipt.provider_message_id,
        status: receipt.status,
        cost: receipt.cost,
    }))
}

#[derive(Debug, Serialize)]
pub struct BulkReply {
    pub success: bool,
    pub job_id: String,
    pub total_count: i64,
    pub invalid_rows: Vec<smsflow_campaign::InvalidRow>,
    pub message: String,
}

struct BulkUpload {
    filename: String,
    file: Bytes,
    message_template: String,
}

/// Pull `file` and `message_template` out of a multipart form.
async fn read_upload(mut multipart: Multipart) -> Result<BulkUpload, ApiError> {
    let mut filename = String::from("upload.csv");
    let mut file: Option<Bytes> = None;
    let mut message_template: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                if let Some(name) = field.file_name() {
                    filename = name.to_string();
                }
                file = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("unreadable file: {e}")))?,
                );
            }
            Some("message_template") => {
                message_template = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("unreadable template: {e}")))?,
                );
            }
            _ => {}
        }
    }

    Ok(BulkUpload {
        filename,
        file: file.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?,
        message_template: message_template
            .ok_or_else(|| ApiError::bad_request("missing 'message_template' field"))?,
    })
}

async fn send_bulk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BulkReply>, ApiError> {
    let upload = read_upload(multipart).await?;
    if upload.message_template.trim().is_empty() {
        return Err(ApiError::bad_request("message template cannot be empty"));
    }

    let report = state.engine.validate_roster(&upload.file)?;
    let invalid_rows = report.invalid_rows.clone();
    let job = state
        .engine
        .start_campaign(report.recipients, &upload.message_template, &upload.filename)
        .await?;

    Ok(Json(BulkReply {
        success: true,
        message: format!("bulk job started, processing {} messages", job.total_count),
        job_id: job.job_id,
        total_count: job.total_count,
        invalid_rows,
    }))
}

async fn validate_csv(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<smsflow_campaign::RosterReport>, ApiError> {
    let upload = read_upload_file_only(multipart).await?;
    let report = state.engine.validate_roster(&upload)?;
    Ok(Json(report))
}

async fn read_upload_file_only(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("unreadable file: {e}")));
        }
    }
    Err(ApiError::bad_request("missing 'file' field"))
}

/// Query parameters for the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<MessageStatus>,
    pub direction: Option<Direction>,
}

impl From<HistoryParams> for HistoryQuery {
    fn from(p: HistoryParams) -> Self {
        let defaults = HistoryQuery::default();
        HistoryQuery {
            status: p.status,
            direction: p.direction,
            limit: p.limit.unwrap_or(defaults.limit).clamp(1, 500),
            offset: p.offset.unwrap_or(0).max(0),
        }
    }
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<smsflow_core::SmsMessage>>, ApiError> {
    let messages = state.engine.store().history(params.into()).await.map_err(CampaignError::from)?;
    Ok(Json(messages))
}

async fn list_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<smsflow_core::BulkJob>>, ApiError> {
    Ok(Json(state.engine.list_jobs().await?))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<smsflow_core::BulkJob>, ApiError> {
    match state.engine.get_job_status(&job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("job not found: {job_id}"),
        }),
    }
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.engine.cancel(&job_id);
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn stats(
    State(state): State<AppState>,
) -> Result<Json<smsflow_store::SmsStats>, ApiError> {
    let stats = state.engine.store().stats().await.map_err(CampaignError::from)?;
    Ok(Json(stats))
}

/// Twilio status callback. Always answers 200 so the provider does not
/// retry payloads we have already logged.
async fn webhook_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let callback = smsflow_twilio::TwilioStatusCallback::parse(&body)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let payload = String::from_utf8_lossy(&body).into_owned();
    let applied = state
        .ingest
        .record_status_update(
            &callback.message_sid,
            callback.status(),
            callback.error_code.clone(),
            callback.error_message.clone(),
            payload,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "applied": format!("{applied:?}").to_lowercase(),
    })))
}

async fn webhook_incoming(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let inbound = smsflow_twilio::TwilioInbound::parse(&body).map_err(|e| {
        warn!(error = %e, "unparseable inbound webhook");
        ApiError::bad_request(e.to_string())
    })?;
    let payload = String::from_utf8_lossy(&body).into_owned();
    let message_id = state
        .ingest
        .record_inbound(
            &inbound.from,
            &inbound.to,
            &inbound.body,
            inbound.message_sid.clone(),
            payload,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "message_id": message_id,
    })))
}
