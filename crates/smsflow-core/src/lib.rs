//! # smsflow-core
//!
//! Core traits and types shared by the smsflow crates:
//! - [`SmsTransport`] trait for the outbound message provider
//! - Domain records: [`Recipient`], [`SmsMessage`], [`BulkJob`]
//! - Status enums and the [`TransportError`] taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use smsflow_core::{SendRequest, SmsTransport};
//!
//! // Any SMS provider implements SmsTransport
//! let response = transport.send(SendRequest {
//!     to: "+1234567890",
//!     from: "+0987654321",
//!     body: "Hello world!",
//! }).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors raised by an outbound transport. Always scoped to a single send.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// HTTP communication error (provider unreachable, connection reset, ...)
    #[error("http error: {0}")]
    Http(String),
    /// Authentication/authorization rejected by the provider
    #[error("authentication error: {0}")]
    Auth(String),
    /// Provider accepted the request but rejected the message
    #[error("provider rejected: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
    /// The send did not complete within the configured deadline
    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TransportError {
    /// Provider error code, when the provider supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Parse failure for one of the status/direction enums.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Message delivery state, as reported by the transport and later refined
/// by status callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Undelivered,
    /// Inbound messages only.
    Received,
}

text_enum!(MessageStatus, "message status", {
    Queued => "queued",
    Sent => "sent",
    Delivered => "delivered",
    Failed => "failed",
    Undelivered => "undelivered",
    Received => "received",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

text_enum!(Direction, "direction", {
    Outbound => "outbound",
    Inbound => "inbound",
});

/// Bulk job lifecycle. Transitions are forward-only:
/// pending -> running -> {completed, completed_with_errors, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

text_enum!(JobStatus, "job status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    CompletedWithErrors => "completed_with_errors",
    Failed => "failed",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(next, JobStatus::Running | JobStatus::Failed),
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// One validated target of a bulk campaign. Immutable once parsed; the
/// extra CSV columns ride along in `fields` for template substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Normalized E.164 number, `+` followed by 10-15 digits.
    pub phone_number: String,
    pub fields: HashMap<String, String>,
}

impl Recipient {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field lookup used by the template renderer. `phone_number` is
    /// addressable like any other column.
    pub fn field(&self, key: &str) -> Option<&str> {
        if key == "phone_number" {
            Some(&self.phone_number)
        } else {
            self.fields.get(key).map(String::as_str)
        }
    }
}

/// A stored SMS message row. Never deleted; status callbacks mutate
/// `status`/`error_*`/`updated_at` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: i64,
    /// Owning bulk job, NULL for single sends and inbound messages.
    pub job_id: Option<String>,
    pub direction: Direction,
    pub to_number: String,
    pub from_number: String,
    pub body: String,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    /// Cost in the provider's billing currency, when reported.
    pub cost: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A bulk campaign job and its progress counters.
///
/// Invariant: `sent_count + failed_count <= total_count`, with equality
/// exactly when the job reaches a terminal state through normal completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub job_id: String,
    pub filename: String,
    pub message_template: String,
    pub total_count: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl BulkJob {
    /// Recipients not yet accounted for by either counter.
    pub fn remaining(&self) -> i64 {
        self.total_count - self.sent_count - self.failed_count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub body: &'a str,
}

/// Successful transport acceptance. "Accepted for sending" only; delivery
/// confirmation arrives later through status callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub provider_message_id: String,
    /// Synchronous status the provider reported, usually `queued` or `sent`.
    pub status: MessageStatus,
    pub cost: Option<f64>,
    /// Name of the backend/provider that produced the response, e.g. "twilio".
    pub provider: &'static str,
    /// Raw provider payload for debugging / audit.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send a single text SMS. Implementations must not retry internally;
    /// retry policy belongs to the caller.
    async fn send(&self, req: SendRequest<'_>) -> Result<SendResponse, TransportError>;
}

/// Utility to create a pseudo id if a provider doesn't return one.
pub fn fallback_id() -> String {
    Uuid::new_v4().to_string()
}

/// New v4 id for a bulk job.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}
