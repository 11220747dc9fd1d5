//! # SMS Flow
//!
//! A bulk SMS campaign service built on Twilio.
//!
//! ## Features
//!
//! - **CSV rosters**: Upload recipient lists with per-recipient template fields
//! - **Template rendering**: `{field}` placeholders filled from roster columns
//! - **Rate limiting**: Rolling-window outbound send limiter
//! - **Campaign engine**: Background job processing with cancellation
//! - **Persistence**: SQLite-backed jobs, message history, and webhook logs
//! - **Webhooks**: Twilio delivery status and inbound message ingestion
//! - **Observability**: Structured logging and tracing support
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smsflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SmsStore::open("sms_app.db").await?;
//!     let transport = TwilioTransport::new("your_account_sid", "your_auth_token");
//!
//!     let config = EngineConfig {
//!         from_number: "+15550006000".to_string(),
//!         ..EngineConfig::default()
//!     };
//!     let engine = CampaignEngine::new(
//!         store,
//!         std::sync::Arc::new(transport),
//!         SendLimiter::per_minute(60),
//!         config,
//!     );
//!
//!     let receipt = engine.send_single("+15551230001", "Hello from SMS Flow!").await?;
//!     println!("Message sent with ID: {}", receipt.provider_message_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration is layered from `config/*.toml` files and `SMSFLOW__`-prefixed
//! environment variables:
//!
//! ```rust,ignore
//! use smsflow::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Rate limit: {} sends per minute", config.rate_limit.sends_per_minute);
//! ```

pub mod config;

pub use config::*;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing from the logging configuration.
///
/// Respects `RUST_LOG` when set, otherwise falls back to the configured level.
pub fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Common imports for SMS Flow usage
pub mod prelude {
    pub use crate::config::{
        AppConfig, LimitsConfig, LoggingConfig, RateLimitConfig, ServerConfig, StorageConfig,
        TwilioConfig,
    };
    pub use smsflow_campaign::{
        parse_roster, render, CampaignEngine, CampaignError, EngineConfig, RosterReport,
        SendLimiter, SendReceipt, WebhookIngest,
    };
    pub use smsflow_core::*;
    pub use smsflow_store::{HistoryQuery, SmsStats, SmsStore, StoreError};
    pub use smsflow_twilio::TwilioTransport;
}
