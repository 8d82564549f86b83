//! Stdio JSON-lines loop
//!
//! Requests are served one line at a time, in order. Responses and event
//! deliveries share a single writer task so lines never interleave.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info};
use triage::{StructuredError, TriageService};

use crate::handler::RequestHandler;
use crate::protocol::Outbound;

/// Counters for one run of the loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub requests: usize,
    pub failures: usize,
    /// Set when a fatal error stopped the loop
    pub fatal: Option<StructuredError>,
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut bytes = serde_json::to_vec(&line).context("Failed to encode output line")?;
        bytes.push(b'\n');
        writer
            .write_all(&bytes)
            .await
            .context("Failed to write output line")?;
        writer.flush().await.context("Failed to flush output")?;
    }
    Ok(())
}

/// Serve requests from `reader` until EOF or a fatal error
pub async fn run<R, W>(
    service: Arc<TriageService>,
    reader: R,
    writer: W,
    tap: bool,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_lines(rx, writer));
    let handler = RequestHandler::new(service, out);
    if tap {
        handler.start_tap();
    }

    let mut summary = RunSummary::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request line")? {
        let Some(response) = handler.handle_line(&line).await else {
            continue;
        };
        summary.requests += 1;
        if matches!(response, Outbound::Response { ok: false, .. }) {
            summary.failures += 1;
        }
        let fatal = match &response {
            Outbound::Response { error: Some(e), .. } if e.fatal => Some(e.clone()),
            _ => None,
        };
        handler.emit(response);
        if let Some(fatal) = fatal {
            error!(code = %fatal.code, message = %fatal.message, "Fatal error, stopping");
            summary.fatal = Some(fatal);
            break;
        }
    }

    handler.shutdown();
    writer_task.await.context("Output writer panicked")??;
    Ok(summary)
}

/// Keep the runtime alive until every open alert is acknowledged, stood down
/// or escalated by its own countdown
pub async fn await_open_alerts(service: &TriageService) {
    let open = service.list_active_alerts();
    if open.is_empty() && service.escalation().pending_countdowns() == 0 {
        return;
    }
    let ack_timeout_secs = service.escalation().ack_timeout().as_secs();
    for alert in &open {
        info!(
            alert_id = %alert.alert_id,
            session_id = %alert.session_id,
            opened_at = %alert.opened_at,
            ack_timeout_secs,
            "Waiting on open alert before exit"
        );
    }
    service.escalation().wait_for_countdowns().await;
    info!(alerts = open.len(), "Open alerts settled");
}
