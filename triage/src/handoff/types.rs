//! Handoff request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{SessionId, UserId};

/// Unique identifier for handoff requests
pub type RequestId = String;

/// Responder identifier from the directory
pub type ResponderId = String;

/// How urgently a human is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    /// High urgency jumps the normal/low tier of a queue
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::High)
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Handoff request lifecycle
///
/// ```text
/// pending ──► assigned
///    │
///    └──► queued ──► assigned
///            ├────► expired
///            └────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Assigned,
    Queued,
    Expired,
    Cancelled,
}

impl HandoffStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }

    pub fn valid_transitions(&self) -> &'static [HandoffStatus] {
        match self {
            Self::Pending => &[Self::Assigned, Self::Queued],
            Self::Queued => &[Self::Assigned, Self::Expired, Self::Cancelled],
            Self::Assigned => &[Self::Cancelled],
            Self::Expired | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: HandoffStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Assigned => write!(f, "assigned"),
            Self::Queued => write!(f, "queued"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the caller is asking for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HandoffCriteria {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Queue bucket; `None` uses the general bucket
    #[serde(default)]
    pub preferred_specialty: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl HandoffCriteria {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.preferred_specialty = Some(specialty.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A request to transfer a session to a human responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub reason: String,
    pub urgency: Urgency,
    pub preferred_specialty: Option<String>,
    pub language: Option<String>,
    pub status: HandoffStatus,
    pub assigned_responder_id: Option<ResponderId>,
    /// 1-based; set only while queued
    pub queue_position: Option<u32>,
    pub estimated_wait_minutes: u32,
    pub created_at: DateTime<Utc>,
    /// When the request entered the queue; drives expiry
    pub queued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(session_id: impl Into<SessionId>, criteria: &HandoffCriteria) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: criteria.user_id.clone(),
            reason: criteria.reason.clone(),
            urgency: criteria.urgency,
            preferred_specialty: criteria.preferred_specialty.clone(),
            language: criteria.language.clone(),
            status: HandoffStatus::Pending,
            assigned_responder_id: None,
            queue_position: None,
            estimated_wait_minutes: 0,
            created_at: now,
            queued_at: None,
            updated_at: now,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: HandoffStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next != HandoffStatus::Queued {
            self.queue_position = None;
        }
        true
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, HandoffStatus::Pending | HandoffStatus::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in [HandoffStatus::Expired, HandoffStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
        assert!(!HandoffStatus::Queued.is_terminal());
    }

    #[test]
    fn test_transition_clears_queue_position() {
        let mut request = HandoffRequest::new("s-1", &HandoffCriteria::new("talk"));
        assert!(request.transition(HandoffStatus::Queued));
        request.queue_position = Some(2);
        assert!(request.transition(HandoffStatus::Assigned));
        assert_eq!(request.queue_position, None);
        assert!(!request.transition(HandoffStatus::Expired));
        assert_eq!(request.status, HandoffStatus::Assigned);
    }

    #[test]
    fn test_urgency_serde_and_default() {
        assert_eq!(Urgency::default(), Urgency::Normal);
        let json = serde_json::to_string(&Urgency::High).unwrap();
        assert_eq!(json, "\"high\"");
        let criteria: HandoffCriteria = serde_json::from_str(r#"{"urgency":"low"}"#).unwrap();
        assert_eq!(criteria.urgency, Urgency::Low);
        assert_eq!(criteria.preferred_specialty, None);
    }
}
