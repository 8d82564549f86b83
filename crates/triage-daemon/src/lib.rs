//! Triage daemon
//!
//! Runs the triage core behind a JSON-lines protocol on stdin/stdout and
//! wires its collaborators from configuration:
//!
//! - protocol catalog and responder roster from TOML files
//! - sentiment scoring and emergency dispatch over HTTP when URLs are set
//! - archive records appended to a JSON-lines file
//!
//! Logs go to stderr; stdout carries only protocol lines.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod handler;
pub mod http;
pub mod protocol;
pub mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use triage::handoff::StaticDirectory;
use triage::{Catalog, JsonlArchive, TriageService};

pub use config::{Args, DaemonConfig};
pub use handler::{HandlerError, RequestHandler};
pub use http::{HttpSentimentScorer, WebhookDispatcher};
pub use protocol::{Outbound, Request, RequestEnvelope};
pub use server::{await_open_alerts, run, RunSummary};

/// Build the triage service with the collaborators named in `config`
pub fn build_service(config: &DaemonConfig) -> Result<Arc<TriageService>> {
    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load protocol catalog {}", path.display()))?,
        None => Catalog::builtin().context("Built-in protocol catalog is invalid")?,
    };

    let mut builder = TriageService::builder(config.triage.clone()).catalog(catalog.shared());

    if let Some(path) = &config.roster_path {
        let directory = StaticDirectory::load(path)
            .with_context(|| format!("Failed to load responder roster {}", path.display()))?;
        builder = builder.directory(directory.shared());
    }
    if let Some(path) = &config.archive_path {
        builder = builder.archive(Arc::new(JsonlArchive::new(path)));
    }
    if let Some(url) = &config.sentiment_url {
        let scorer = HttpSentimentScorer::new(url.clone(), config.http_timeout)
            .context("Failed to build sentiment client")?;
        builder = builder.sentiment(Arc::new(scorer));
    }
    if let Some(url) = &config.dispatch_webhook {
        let dispatcher = WebhookDispatcher::new(url.clone(), config.http_timeout)
            .context("Failed to build dispatch client")?;
        builder = builder.dispatcher(Arc::new(dispatcher));
    }

    builder.build().context("Failed to build triage service")
}
