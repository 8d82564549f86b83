//! Notification event types
//!
//! Events are advisory. The escalation countdown is the safety net, not
//! delivery of any of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::{AlertId, Indicator, Resolution};
use crate::handoff::{RequestId, ResponderId, Urgency};
use crate::session::SessionId;

/// All triage notification events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    /// A new crisis alert is waiting for a responder
    AlertOpened {
        alert_id: AlertId,
        session_id: SessionId,
        severity: u8,
        indicators: Vec<Indicator>,
        source_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A further high-risk turn was folded into an active alert
    AlertUpdated {
        alert_id: AlertId,
        session_id: SessionId,
        severity: u8,
        indicators: Vec<Indicator>,
        timestamp: DateTime<Utc>,
    },

    AlertResolved {
        alert_id: AlertId,
        session_id: SessionId,
        severity: u8,
        resolution: Resolution,
        acknowledged_by: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Countdown elapsed; emergency fallback engaged
    AlertEscalated {
        alert_id: AlertId,
        session_id: SessionId,
        severity: u8,
        timestamp: DateTime<Utc>,
    },

    EmergencyDispatchFailed {
        alert_id: AlertId,
        session_id: SessionId,
        severity: u8,
        error: String,
        timestamp: DateTime<Utc>,
    },

    HandoffAssigned {
        request_id: RequestId,
        session_id: SessionId,
        responder_id: ResponderId,
        urgency: Urgency,
        specialty: Option<String>,
        timestamp: DateTime<Utc>,
    },

    HandoffQueued {
        request_id: RequestId,
        session_id: SessionId,
        urgency: Urgency,
        specialty: Option<String>,
        queue_position: u32,
        estimated_wait_minutes: u32,
        timestamp: DateTime<Utc>,
    },

    HandoffExpired {
        request_id: RequestId,
        session_id: SessionId,
        specialty: Option<String>,
        timestamp: DateTime<Utc>,
    },

    HandoffCancelled {
        request_id: RequestId,
        session_id: SessionId,
        specialty: Option<String>,
        timestamp: DateTime<Utc>,
    },

    RiskLevelChanged {
        session_id: SessionId,
        previous: u8,
        current: u8,
        timestamp: DateTime<Utc>,
    },

    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
        turn_count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Why a session went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Ended,
    Expired,
}

impl TriageEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::AlertOpened { timestamp, .. }
            | Self::AlertUpdated { timestamp, .. }
            | Self::AlertResolved { timestamp, .. }
            | Self::AlertEscalated { timestamp, .. }
            | Self::EmergencyDispatchFailed { timestamp, .. }
            | Self::HandoffAssigned { timestamp, .. }
            | Self::HandoffQueued { timestamp, .. }
            | Self::HandoffExpired { timestamp, .. }
            | Self::HandoffCancelled { timestamp, .. }
            | Self::RiskLevelChanged { timestamp, .. }
            | Self::SessionEnded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AlertOpened { .. } => "alert_opened",
            Self::AlertUpdated { .. } => "alert_updated",
            Self::AlertResolved { .. } => "alert_resolved",
            Self::AlertEscalated { .. } => "alert_escalated",
            Self::EmergencyDispatchFailed { .. } => "emergency_dispatch_failed",
            Self::HandoffAssigned { .. } => "handoff_assigned",
            Self::HandoffQueued { .. } => "handoff_queued",
            Self::HandoffExpired { .. } => "handoff_expired",
            Self::HandoffCancelled { .. } => "handoff_cancelled",
            Self::RiskLevelChanged { .. } => "risk_level_changed",
            Self::SessionEnded { .. } => "session_ended",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::AlertOpened { session_id, .. }
            | Self::AlertUpdated { session_id, .. }
            | Self::AlertResolved { session_id, .. }
            | Self::AlertEscalated { session_id, .. }
            | Self::EmergencyDispatchFailed { session_id, .. }
            | Self::HandoffAssigned { session_id, .. }
            | Self::HandoffQueued { session_id, .. }
            | Self::HandoffExpired { session_id, .. }
            | Self::HandoffCancelled { session_id, .. }
            | Self::RiskLevelChanged { session_id, .. }
            | Self::SessionEnded { session_id, .. } => session_id,
        }
    }

    pub fn alert_id(&self) -> Option<&str> {
        match self {
            Self::AlertOpened { alert_id, .. }
            | Self::AlertUpdated { alert_id, .. }
            | Self::AlertResolved { alert_id, .. }
            | Self::AlertEscalated { alert_id, .. }
            | Self::EmergencyDispatchFailed { alert_id, .. } => Some(alert_id),
            _ => None,
        }
    }

    /// Specialty bucket for handoff events
    pub fn specialty(&self) -> Option<&str> {
        match self {
            Self::HandoffAssigned { specialty, .. }
            | Self::HandoffQueued { specialty, .. }
            | Self::HandoffExpired { specialty, .. }
            | Self::HandoffCancelled { specialty, .. } => specialty.as_deref(),
            _ => None,
        }
    }

    /// Alert severity, or the new risk level for risk changes
    pub fn severity(&self) -> Option<u8> {
        match self {
            Self::AlertOpened { severity, .. }
            | Self::AlertUpdated { severity, .. }
            | Self::AlertResolved { severity, .. }
            | Self::AlertEscalated { severity, .. }
            | Self::EmergencyDispatchFailed { severity, .. } => Some(*severity),
            Self::RiskLevelChanged { current, .. } => Some(*current),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = TriageEvent::AlertEscalated {
            alert_id: "a-1".into(),
            session_id: "s-1".into(),
            severity: 5,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(event.alert_id(), Some("a-1"));
        assert_eq!(event.severity(), Some(5));
    }

    #[test]
    fn test_handoff_event_accessors() {
        let event = TriageEvent::HandoffQueued {
            request_id: "h-1".into(),
            session_id: "s-1".into(),
            urgency: Urgency::High,
            specialty: Some("crisis".into()),
            queue_position: 1,
            estimated_wait_minutes: 10,
            timestamp: Utc::now(),
        };
        assert_eq!(event.specialty(), Some("crisis"));
        assert_eq!(event.alert_id(), None);
        assert_eq!(event.severity(), None);
        assert_eq!(event.session_id(), "s-1");
    }

    #[test]
    fn test_roundtrip_session_ended() {
        let event = TriageEvent::SessionEnded {
            session_id: "s-1".into(),
            reason: SessionEndReason::Expired,
            turn_count: 3,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"expired\""));
        let back: TriageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
