//! Stdio wire protocol
//!
//! One JSON object per line in each direction.
//!
//! ```text
//! → {"id": 7, "component": "session", "command": {"op": "handle_message", "session_id": "s-1", "message": "..."}}
//! ← {"kind": "response", "id": 7, "ok": true, "result": {...}}
//! ← {"kind": "delivery", "subscriber_id": "crisis-desk", "targeted": false, "event": {"type": "alert_opened", ...}}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use triage::events::Delivery;
use triage::{EventFilter, HandoffCriteria, StructuredError, TriageError, TriageEvent};

/// Request line: optional correlation id plus a component command
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub request: Request,
}

/// Commands grouped by the component that serves them
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "component", content = "command", rename_all = "snake_case")]
pub enum Request {
    Session(SessionCommand),
    Crisis(CrisisCommand),
    Handoff(HandoffCommand),
    Monitor(MonitorCommand),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionCommand {
    HandleMessage {
        session_id: String,
        #[serde(default)]
        user_id: Option<String>,
        message: String,
    },
    Classify {
        session_id: String,
        message: String,
    },
    Snapshot {
        session_id: String,
    },
    End {
        session_id: String,
    },
    UserIsSafe {
        session_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CrisisCommand {
    Acknowledge {
        alert_id: String,
        responder_id: String,
    },
    Get {
        alert_id: String,
    },
    ActiveForSession {
        session_id: String,
    },
    ListActive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HandoffCommand {
    Request {
        session_id: String,
        #[serde(default)]
        criteria: HandoffCriteria,
    },
    Cancel {
        request_id: String,
    },
    ResponderAvailable {
        responder_id: String,
    },
    Position {
        request_id: String,
    },
    Get {
        request_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MonitorCommand {
    Subscribe {
        subscriber_id: String,
        #[serde(default)]
        filter: EventFilter,
    },
    Unsubscribe {
        subscriber_id: String,
    },
    Maintenance,
    Health,
}

/// Errors reading a request line
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed request line: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: "MALFORMED_REQUEST".to_string(),
            message: self.to_string(),
            benign: false,
            fatal: false,
        }
    }
}

/// Parse one request line
pub fn parse_request(line: &str) -> Result<RequestEnvelope, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Everything written to stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<serde_json::Value>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<StructuredError>,
    },
    Delivery {
        subscriber_id: String,
        targeted: bool,
        event: TriageEvent,
    },
    Event {
        event: TriageEvent,
    },
}

impl Outbound {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self::Response {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<serde_json::Value>, error: StructuredError) -> Self {
        Self::Response {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_result(
        id: Option<serde_json::Value>,
        result: Result<serde_json::Value, TriageError>,
    ) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, e.to_structured()),
        }
    }

    pub fn delivery(delivery: Delivery) -> Self {
        Self::Delivery {
            subscriber_id: delivery.subscriber_id,
            targeted: delivery.targeted,
            event: delivery.event,
        }
    }

    /// A response carrying an error the process must stop on
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Response { error: Some(e), .. } if e.fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_command() {
        let line = r#"{"id": 1, "component": "session", "command": {"op": "handle_message", "session_id": "s-1", "message": "hi"}}"#;
        let envelope = parse_request(line).unwrap();
        assert_eq!(envelope.id, Some(serde_json::json!(1)));
        match envelope.request {
            Request::Session(SessionCommand::HandleMessage {
                session_id,
                user_id,
                message,
            }) => {
                assert_eq!(session_id, "s-1");
                assert_eq!(user_id, None);
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_command_and_defaults() {
        let envelope =
            parse_request(r#"{"component": "crisis", "command": {"op": "list_active"}}"#).unwrap();
        assert!(envelope.id.is_none());
        assert!(matches!(
            envelope.request,
            Request::Crisis(CrisisCommand::ListActive)
        ));

        let envelope = parse_request(
            r#"{"component": "monitor", "command": {"op": "subscribe", "subscriber_id": "desk"}}"#,
        )
        .unwrap();
        match envelope.request {
            Request::Monitor(MonitorCommand::Subscribe { filter, .. }) => {
                assert_eq!(filter, EventFilter::default())
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_handoff_criteria() {
        let line = r#"{"component": "handoff", "command": {"op": "request", "session_id": "s-1",
            "criteria": {"reason": "panic", "urgency": "high", "preferred_specialty": "anxiety"}}}"#;
        match parse_request(line).unwrap().request {
            Request::Handoff(HandoffCommand::Request { criteria, .. }) => {
                assert_eq!(criteria.reason, "panic");
                assert!(criteria.urgency.is_priority());
                assert_eq!(criteria.preferred_specialty.as_deref(), Some("anxiety"));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_component_is_malformed() {
        let err = parse_request(r#"{"component": "billing", "command": {"op": "x"}}"#).unwrap_err();
        assert_eq!(err.to_structured().code, "MALFORMED_REQUEST");
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn test_fatal_response_detected() {
        let fatal = Outbound::from_result(
            None,
            Err(TriageError::TimerUnavailable {
                alert_id: "a-1".to_string(),
                message: "no runtime".to_string(),
            }),
        );
        assert!(fatal.is_fatal());

        let benign = Outbound::from_result(None, Err(TriageError::not_found("alert", "a-1")));
        assert!(!benign.is_fatal());

        let json = serde_json::to_value(&benign).unwrap();
        assert_eq!(json["kind"], "response");
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["benign"], true);
    }
}
