use std::sync::Arc;

use smsflow::config::AppConfig;
use smsflow_campaign::{CampaignEngine, EngineConfig, SendLimiter};
use smsflow_store::SmsStore;
use smsflow_twilio::TwilioTransport;
use smsflow_web_axum::{router, AppState};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    smsflow::init_tracing(&config.logging);

    let twilio = config.twilio.clone().ok_or(
        "missing Twilio configuration: set SMSFLOW__TWILIO__ACCOUNT_SID, \
         SMSFLOW__TWILIO__AUTH_TOKEN and SMSFLOW__TWILIO__FROM_NUMBER",
    )?;

    let store = SmsStore::open(&config.storage.database_path).await?;
    info!(path = %config.storage.database_path, "database ready");

    let transport = TwilioTransport::new(twilio.account_sid, twilio.auth_token);

    let limiter = if config.rate_limit.enabled {
        SendLimiter::per_minute(config.rate_limit.sends_per_minute)
    } else {
        warn!("outbound rate limiting is disabled");
        SendLimiter::disabled()
    };

    let engine = CampaignEngine::new(
        store,
        Arc::new(transport),
        limiter,
        EngineConfig {
            from_number: twilio.from_number,
            max_recipients: config.limits.max_recipients,
            send_timeout: config.limits.send_timeout(),
        },
    );

    let app = router(AppState::new(engine));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate, shutting down"),
    }
}
