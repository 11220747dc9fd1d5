//! # smsflow-campaign
//!
//! The bulk-SMS campaign engine and its supporting pieces:
//! - [`roster`]: CSV recipient list parsing and phone validation
//! - [`template`]: `{field}` placeholder rendering
//! - [`limiter`]: process-wide sliding-window send throttle
//! - [`engine`]: campaign orchestration and single sends
//! - [`ingest`]: webhook-driven status and inbound-message recording

pub mod engine;
pub mod ingest;
pub mod limiter;
pub mod roster;
pub mod template;

pub use engine::{CampaignEngine, EngineConfig, SendReceipt};
pub use ingest::WebhookIngest;
pub use limiter::SendLimiter;
pub use roster::{parse_roster, InvalidRow, RosterReport};
pub use template::render;

use smsflow_core::TransportError;
use smsflow_store::StoreError;

/// Top-level error taxonomy for campaign operations.
///
/// `Transport` never escapes the per-recipient loop of a running job; it
/// only surfaces from single sends. Everything else rejects or aborts the
/// enclosing operation.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// Malformed upload: bad CSV, missing required column, or no usable rows.
    #[error("validation error: {0}")]
    Validation(String),
    /// Recipient count over the configured ceiling.
    #[error("recipient limit exceeded: {count} rows, limit {limit}")]
    LimitExceeded { count: usize, limit: usize },
    /// Provider rejected or was unreachable.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Store unavailable; fatal to the operation in progress.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}
