//! Request handler: maps protocol commands onto `TriageService` calls

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use triage::events::Subscription;
use triage::{StructuredError, TriageError, TriageService};

use crate::protocol::{
    parse_request, CrisisCommand, HandoffCommand, MonitorCommand, Outbound, Request,
    SessionCommand,
};

/// Errors from serving one command
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Triage(#[from] TriageError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn to_structured(&self) -> StructuredError {
        match self {
            Self::Triage(e) => e.to_structured(),
            Self::Encode(e) => StructuredError {
                code: "ENCODE".to_string(),
                message: e.to_string(),
                benign: false,
                fatal: false,
            },
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

fn encode<T: Serialize>(value: &T) -> HandlerResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Serves commands and forwards subscribed events to the output channel
pub struct RequestHandler {
    service: Arc<TriageService>,
    out: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
    forwarders: Mutex<HashMap<String, CancellationToken>>,
    started_at: DateTime<Utc>,
}

impl RequestHandler {
    pub fn new(service: Arc<TriageService>, out: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            service,
            out,
            shutdown: CancellationToken::new(),
            forwarders: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// Queue a line for output; a closed writer drops it
    pub fn emit(&self, line: Outbound) {
        if self.out.send(line).is_err() {
            debug!("Output closed, dropping line");
        }
    }

    /// Parse and serve one input line. Blank lines produce nothing.
    pub async fn handle_line(&self, line: &str) -> Option<Outbound> {
        if line.trim().is_empty() {
            return None;
        }
        let envelope = match parse_request(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Rejected request line");
                return Some(Outbound::failure(None, e.to_structured()));
            }
        };
        let response = match self.handle(envelope.request).await {
            Ok(result) => Outbound::success(envelope.id, result),
            Err(e) => {
                if matches!(&e, HandlerError::Triage(t) if t.is_benign()) {
                    debug!(error = %e, "Benign request failure");
                } else {
                    warn!(error = %e, "Request failed");
                }
                Outbound::failure(envelope.id, e.to_structured())
            }
        };
        Some(response)
    }

    pub async fn handle(&self, request: Request) -> HandlerResult<Value> {
        match request {
            Request::Session(command) => self.handle_session(command).await,
            Request::Crisis(command) => self.handle_crisis(command).await,
            Request::Handoff(command) => self.handle_handoff(command).await,
            Request::Monitor(command) => self.handle_monitor(command).await,
        }
    }

    async fn handle_session(&self, command: SessionCommand) -> HandlerResult<Value> {
        let service = &self.service;
        match command {
            SessionCommand::HandleMessage {
                session_id,
                user_id,
                message,
            } => encode(
                &service
                    .handle_message(&session_id, user_id.as_deref(), &message)
                    .await?,
            ),
            SessionCommand::Classify {
                session_id,
                message,
            } => encode(&service.classify(&session_id, &message).await?),
            SessionCommand::Snapshot { session_id } => {
                let snapshot = service
                    .snapshot(&session_id)
                    .await?
                    .ok_or_else(|| TriageError::not_found("session", session_id.as_str()))?;
                encode(&snapshot)
            }
            SessionCommand::End { session_id } => encode(&service.end_session(&session_id).await?),
            SessionCommand::UserIsSafe { session_id } => {
                encode(&service.user_is_safe(&session_id).await?)
            }
        }
    }

    async fn handle_crisis(&self, command: CrisisCommand) -> HandlerResult<Value> {
        let service = &self.service;
        match command {
            CrisisCommand::Acknowledge {
                alert_id,
                responder_id,
            } => encode(
                &service
                    .acknowledge_crisis_alert(&alert_id, &responder_id)
                    .await?,
            ),
            CrisisCommand::Get { alert_id } => encode(&service.get_alert(&alert_id)?),
            CrisisCommand::ActiveForSession { session_id } => {
                encode(&service.escalation().active_for_session(&session_id))
            }
            CrisisCommand::ListActive => encode(&service.list_active_alerts()),
        }
    }

    async fn handle_handoff(&self, command: HandoffCommand) -> HandlerResult<Value> {
        let service = &self.service;
        match command {
            HandoffCommand::Request {
                session_id,
                criteria,
            } => encode(&service.request_handoff(&session_id, criteria).await?),
            HandoffCommand::Cancel { request_id } => {
                encode(&service.cancel_handoff(&request_id).await?)
            }
            HandoffCommand::ResponderAvailable { responder_id } => {
                encode(&service.responder_available(&responder_id).await?)
            }
            HandoffCommand::Position { request_id } => {
                let position = service.handoffs().queue_position(&request_id).await?;
                Ok(json!({ "request_id": request_id, "queue_position": position }))
            }
            HandoffCommand::Get { request_id } => {
                let request = service
                    .handoffs()
                    .get(&request_id)
                    .await
                    .ok_or_else(|| TriageError::not_found("handoff", request_id.as_str()))?;
                encode(&request)
            }
        }
    }

    async fn handle_monitor(&self, command: MonitorCommand) -> HandlerResult<Value> {
        match command {
            MonitorCommand::Subscribe {
                subscriber_id,
                filter,
            } => {
                if subscriber_id.trim().is_empty() {
                    return Err(TriageError::validation("subscriber_id must not be empty").into());
                }
                let subscription = self.service.bus().subscribe(&subscriber_id, filter);
                self.forward(subscription);
                info!(subscriber_id = %subscriber_id, "Subscriber registered");
                Ok(json!({ "subscriber_id": subscriber_id, "subscribed": true }))
            }
            MonitorCommand::Unsubscribe { subscriber_id } => {
                let removed = self.service.bus().unsubscribe(&subscriber_id);
                if let Some(token) = self.lock_forwarders().remove(&subscriber_id) {
                    token.cancel();
                }
                Ok(json!({ "subscriber_id": subscriber_id, "removed": removed }))
            }
            MonitorCommand::Maintenance => encode(&self.service.run_maintenance(Utc::now()).await?),
            MonitorCommand::Health => {
                let service = &self.service;
                Ok(json!({
                    "catalog_version": service.catalog().version(),
                    "sessions": service.sessions().session_count().await,
                    "alerts": service.escalation().alert_count(),
                    "active_alerts": service.list_active_alerts().len(),
                    "subscribers": service.bus().subscriber_count(),
                    "started_at": self.started_at,
                    "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
                }))
            }
        }
    }

    fn lock_forwarders(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.forwarders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pump one subscription into the output channel until unsubscribed or shut down
    fn forward(&self, mut subscription: Subscription) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self
            .lock_forwarders()
            .insert(subscription.subscriber_id().to_string(), token.clone())
        {
            previous.cancel();
        }
        let out = self.out.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        // Flush what was published before shutdown
                        while let Some(delivery) = subscription.try_recv() {
                            if out.send(Outbound::delivery(delivery)).is_err() {
                                break;
                            }
                        }
                        break;
                    }
                    delivery = subscription.recv() => match delivery {
                        Some(delivery) => {
                            if out.send(Outbound::delivery(delivery)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    /// Forward every published event, independent of subscriptions
    pub fn start_tap(&self) {
        let mut tap = self.service.bus().tap();
        let token = self.shutdown.child_token();
        let out = self.out.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        while let Ok(event) = tap.try_recv() {
                            if out.send(Outbound::Event { event }).is_err() {
                                break;
                            }
                        }
                        break;
                    }
                    event = tap.recv() => match event {
                        Ok(event) => {
                            if out.send(Outbound::Event { event }).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Event tap lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Stop all forwarders and release the output channel
    pub fn shutdown(self) {
        self.shutdown.cancel();
    }
}
