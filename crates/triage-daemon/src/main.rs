//! Triage daemon binary
//!
//! ```bash
//! # Built-in catalog, log-only emergency dispatch
//! triage-daemon
//!
//! # Production wiring
//! triage-daemon --config /etc/triage/triage.toml \
//!     --roster /etc/triage/roster.toml \
//!     --archive /var/lib/triage/archive.jsonl \
//!     --dispatch-webhook https://oncall.example/hooks/triage
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use triage_daemon::{await_open_alerts, build_service, run, Args, DaemonConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = DaemonConfig::from_args(args)?;
    let service = build_service(&config)?;
    info!(
        catalog = %service.catalog().version(),
        ack_timeout_secs = config.triage.ack_timeout_secs,
        threshold = config.triage.escalation_threshold,
        sentiment = config.sentiment_url.as_deref().unwrap_or("lexicon"),
        dispatch = config.dispatch_webhook.as_deref().unwrap_or("log"),
        "Triage daemon starting"
    );

    let cancel = CancellationToken::new();
    let maintenance = service.spawn_maintenance(cancel.clone());

    let summary = tokio::select! {
        summary = run(
            Arc::clone(&service),
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            config.tap,
        ) => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
    };

    cancel.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task ended abnormally");
    }

    // Countdowns die with the runtime; let each reach its own deadline first
    tokio::select! {
        _ = await_open_alerts(&service) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!(open = service.list_active_alerts().len(), "Interrupted again, exiting with alerts open");
        }
    }

    if let Some(summary) = summary.transpose()? {
        if let Some(fatal) = summary.fatal {
            anyhow::bail!("Stopped on fatal error {}: {}", fatal.code, fatal.message);
        }
        info!(
            requests = summary.requests,
            failures = summary.failures,
            "Input closed, shutting down"
        );
    }
    Ok(())
}
