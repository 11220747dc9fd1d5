use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smsflow_core::{MessageStatus, SendRequest, SendResponse, SmsTransport, TransportError};

const PROVIDER: &str = "twilio";

/// Twilio REST transport.
#[derive(Clone, Debug)]
pub struct TwilioTransport {
    /// Twilio Account SID (username for Basic auth).
    pub account_sid: String,
    /// Twilio Auth Token (password for Basic auth).
    pub auth_token: String,
    /// API base URL; override for testing/mocking.
    pub base_url: String,
    /// Optional HTTP client (behind feature).
    #[cfg(feature = "reqwest")]
    http: reqwest::Client,
}

impl TwilioTransport {
    pub fn new<S: Into<String>>(account_sid: S, auth_token: S) -> Self {
        Self::with_base_url(account_sid, auth_token, "https://api.twilio.com".to_string())
    }

    pub fn with_base_url<S: Into<String>>(account_sid: S, auth_token: S, base_url: String) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            base_url,
            #[cfg(feature = "reqwest")]
            http: reqwest::Client::new(),
        }
    }
}

/// Form body for the Messages endpoint. Twilio takes
/// `application/x-www-form-urlencoded`, not JSON.
#[derive(Debug, Serialize)]
struct TwilioSendForm<'a> {
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "Body")]
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Map a Twilio message status string onto the normalized states. Twilio's
/// transient states ("accepted", "sending") collapse into `queued`.
pub fn map_provider_status(status: &str) -> MessageStatus {
    match status {
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "failed" => MessageStatus::Failed,
        "undelivered" => MessageStatus::Undelivered,
        "received" => MessageStatus::Received,
        _ => MessageStatus::Queued,
    }
}

#[async_trait]
impl SmsTransport for TwilioTransport {
    async fn send(&self, req: SendRequest<'_>) -> Result<SendResponse, TransportError> {
        #[cfg(not(feature = "reqwest"))]
        {
            let _ = req;
            return Err(TransportError::Http("reqwest feature disabled".into()));
        }
        #[cfg(feature = "reqwest")]
        {
            let url = format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url.trim_end_matches('/'),
                self.account_sid
            );
            let form = TwilioSendForm {
                to: req.to,
                from: req.from,
                body: req.body,
            };
            let res = self
                .http
                .post(url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .form(&form)
                .send()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;

            let status = res.status();
            let raw_text = res
                .text()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let raw_json: serde_json::Value = serde_json::from_str(&raw_text)
                .unwrap_or_else(|_| serde_json::json!({ "raw": raw_text }));

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(TransportError::Auth(format!("HTTP {}", status)));
            }
            if !status.is_success() {
                let err: TwilioErrorBody =
                    serde_json::from_value(raw_json.clone()).unwrap_or(TwilioErrorBody {
                        code: None,
                        message: None,
                    });
                return Err(TransportError::Rejected {
                    code: err.code.map(|c| c.to_string()),
                    message: err
                        .message
                        .unwrap_or_else(|| format!("HTTP {}", status)),
                });
            }

            let provider_message_id = raw_json
                .get("sid")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(smsflow_core::fallback_id);
            let reported = raw_json
                .get("status")
                .and_then(|v| v.as_str())
                .map(map_provider_status)
                .unwrap_or(MessageStatus::Queued);
            // Twilio reports price as a decimal string, often null at create time.
            let cost = raw_json
                .get("price")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .map(f64::abs);

            Ok(SendResponse {
                provider_message_id,
                status: reported,
                cost,
                provider: PROVIDER,
                raw: raw_json,
            })
        }
    }
}

/// Status callback webhook payload. Twilio posts
/// `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwilioStatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
}

impl TwilioStatusCallback {
    pub fn parse(body: &[u8]) -> Result<Self, TransportError> {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| TransportError::Http(format!("form decode: {}", e)))
    }

    pub fn status(&self) -> MessageStatus {
        map_provider_status(&self.message_status)
    }
}

/// Inbound message webhook payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwilioInbound {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
}

impl TwilioInbound {
    pub fn parse(body: &[u8]) -> Result<Self, TransportError> {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| TransportError::Http(format!("form decode: {}", e)))
    }
}
