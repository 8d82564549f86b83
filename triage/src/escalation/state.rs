//! Crisis alert state machine
//!
//! ```text
//! active ──acknowledge / stand_down──► resolved   (terminal)
//!    └─────────timer elapsed─────────► escalated  (terminal)
//! ```
//!
//! Every transition is a compare-and-set that only starts from `Active`.
//! Whichever transition commits first wins; the loser gets [`Transition::NoOp`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{SessionId, UserId};

/// Unique identifier for crisis alerts
pub type AlertId = String;

/// Lifecycle state of a crisis alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Waiting for a responder; countdown armed
    Active,
    /// Countdown elapsed, emergency fallback engaged
    Escalated,
    /// Acknowledged by a responder or stood down by the user
    Resolved,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Escalated => write!(f, "escalated"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// How a resolved alert was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Acknowledged,
    UserStoodDown,
}

/// Evidence that contributed to an alert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Indicator {
    /// `keyword`, `category`, `protocol` or `sentiment`
    pub source: String,
    pub evidence: String,
}

impl Indicator {
    pub fn new(source: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            evidence: evidence.into(),
        }
    }
}

/// Acknowledgement that arrived after the alert had already escalated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateAcknowledgement {
    pub responder_id: String,
    pub at: DateTime<Utc>,
}

/// Outcome of a transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Applied { from: AlertStatus, to: AlertStatus },
    NoOp { status: AlertStatus },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A tracked safety event awaiting human acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisAlert {
    pub alert_id: AlertId,
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    /// 1..=5, only ever raised
    pub severity: u8,
    pub source_message: String,
    pub indicators: Vec<Indicator>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub late_acknowledgements: Vec<LateAcknowledgement>,
}

impl CrisisAlert {
    pub fn new(
        session_id: impl Into<SessionId>,
        user_id: Option<UserId>,
        severity: u8,
        source_message: impl Into<String>,
        indicators: Vec<Indicator>,
    ) -> Self {
        let now = Utc::now();
        let mut alert = Self {
            alert_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id,
            severity: severity.clamp(1, 5),
            source_message: source_message.into(),
            indicators: Vec::new(),
            opened_at: now,
            updated_at: now,
            status: AlertStatus::Active,
            acknowledged_by: None,
            acknowledged_at: None,
            resolution: None,
            escalated_at: None,
            late_acknowledgements: Vec::new(),
        };
        alert.add_indicators(indicators);
        alert
    }

    fn add_indicators(&mut self, indicators: Vec<Indicator>) {
        for indicator in indicators {
            if !self.indicators.contains(&indicator) {
                self.indicators.push(indicator);
            }
        }
    }

    /// Fold a further high-risk turn into this alert.
    /// Returns whether anything changed.
    pub fn merge(&mut self, severity: u8, indicators: Vec<Indicator>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let before = (self.severity, self.indicators.len());
        self.severity = self.severity.max(severity.clamp(1, 5));
        self.add_indicators(indicators);
        let changed = before != (self.severity, self.indicators.len());
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    fn close(&mut self, to: AlertStatus) -> Transition {
        if self.status != AlertStatus::Active {
            return Transition::NoOp {
                status: self.status,
            };
        }
        let from = self.status;
        self.status = to;
        self.updated_at = Utc::now();
        Transition::Applied { from, to }
    }

    /// Responder acknowledgement. After escalation it is kept as metadata only.
    pub fn acknowledge(&mut self, responder_id: &str) -> Transition {
        let now = Utc::now();
        match self.status {
            AlertStatus::Active => {
                let transition = self.close(AlertStatus::Resolved);
                self.acknowledged_by = Some(responder_id.to_string());
                self.acknowledged_at = Some(now);
                self.resolution = Some(Resolution::Acknowledged);
                transition
            }
            AlertStatus::Escalated => {
                self.late_acknowledgements.push(LateAcknowledgement {
                    responder_id: responder_id.to_string(),
                    at: now,
                });
                Transition::NoOp {
                    status: self.status,
                }
            }
            AlertStatus::Resolved => Transition::NoOp {
                status: self.status,
            },
        }
    }

    /// The user signalled they are safe
    pub fn stand_down(&mut self) -> Transition {
        let transition = self.close(AlertStatus::Resolved);
        if transition.applied() {
            self.resolution = Some(Resolution::UserStoodDown);
        }
        transition
    }

    /// Countdown elapsed without acknowledgement
    pub fn escalate(&mut self) -> Transition {
        let transition = self.close(AlertStatus::Escalated);
        if transition.applied() {
            self.escalated_at = Some(self.updated_at);
        }
        transition
    }

    /// When the alert reached a terminal state
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            AlertStatus::Active => None,
            _ => Some(self.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> CrisisAlert {
        CrisisAlert::new(
            "s-1",
            None,
            5,
            "I want to kill myself",
            vec![Indicator::new("keyword", "kill myself")],
        )
    }

    #[test]
    fn test_new_alert_is_active() {
        let a = alert();
        assert_eq!(a.status, AlertStatus::Active);
        assert!(!a.status.is_terminal());
        assert_eq!(a.closed_at(), None);
    }

    #[test]
    fn test_acknowledge_resolves_once() {
        let mut a = alert();
        let first = a.acknowledge("r-1");
        assert_eq!(
            first,
            Transition::Applied {
                from: AlertStatus::Active,
                to: AlertStatus::Resolved
            }
        );
        assert_eq!(a.acknowledged_by.as_deref(), Some("r-1"));
        assert_eq!(a.resolution, Some(Resolution::Acknowledged));

        let second = a.acknowledge("r-2");
        assert!(!second.applied());
        assert_eq!(a.acknowledged_by.as_deref(), Some("r-1"));
    }

    #[test]
    fn test_ack_after_escalation_is_metadata_only() {
        let mut a = alert();
        assert!(a.escalate().applied());
        let late = a.acknowledge("r-1");
        assert_eq!(
            late,
            Transition::NoOp {
                status: AlertStatus::Escalated
            }
        );
        assert_eq!(a.status, AlertStatus::Escalated);
        assert_eq!(a.acknowledged_by, None);
        assert_eq!(a.late_acknowledgements.len(), 1);
        assert_eq!(a.late_acknowledgements[0].responder_id, "r-1");
    }

    #[test]
    fn test_escalate_after_resolution_is_noop() {
        let mut a = alert();
        assert!(a.stand_down().applied());
        assert_eq!(a.resolution, Some(Resolution::UserStoodDown));
        assert!(!a.escalate().applied());
        assert_eq!(a.status, AlertStatus::Resolved);
        assert_eq!(a.escalated_at, None);
    }

    #[test]
    fn test_merge_takes_max_and_dedupes() {
        let mut a = CrisisAlert::new("s-1", None, 4, "msg", vec![Indicator::new("keyword", "hurt")]);
        assert!(a.merge(5, vec![Indicator::new("keyword", "hurt"), Indicator::new("keyword", "die")]));
        assert_eq!(a.severity, 5);
        assert_eq!(a.indicators.len(), 2);
        assert!(!a.merge(3, vec![Indicator::new("keyword", "die")]));
        assert_eq!(a.severity, 5);
    }

    #[test]
    fn test_merge_ignored_once_terminal() {
        let mut a = alert();
        a.escalate();
        assert!(!a.merge(5, vec![Indicator::new("keyword", "new")]));
        assert_eq!(a.indicators.len(), 1);
    }
}
