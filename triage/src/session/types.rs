//! Session, turn and snapshot types

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassificationResult, DetectedEmotion, SentimentScore};
use crate::handoff::HandoffStatus;

/// Unique identifier for sessions
pub type SessionId = String;

/// Opaque user identity supplied by the auth layer
pub type UserId = String;

/// One classified message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the session, assigned by the store on append
    pub turn_index: u64,
    pub raw_message: String,
    pub timestamp: DateTime<Utc>,
    pub matched_protocol_id: Option<String>,
    /// `None` when the scorer was unavailable
    pub sentiment: Option<SentimentScore>,
    pub detected_emotions: Vec<DetectedEmotion>,
    pub risk_score: u8,
}

impl Turn {
    /// Build a turn record from a classification
    pub fn from_classification(raw_message: &str, result: &ClassificationResult) -> Self {
        Self {
            turn_index: 0,
            raw_message: raw_message.to_string(),
            timestamp: Utc::now(),
            matched_protocol_id: result.protocol_id().map(str::to_string),
            sentiment: result.sentiment,
            detected_emotions: result.detected_emotions.clone(),
            risk_score: result.risk_score,
        }
    }
}

/// One point on a session's emotional trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub emotion: String,
    pub intensity: f32,
    pub timestamp: DateTime<Utc>,
}

/// Handoff outcome written back to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRef {
    pub request_id: String,
    pub status: HandoffStatus,
    pub responder_id: Option<String>,
    pub queue_position: Option<u32>,
}

/// Full state of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
    pub technique_usage_counts: BTreeMap<String, u32>,
    /// Bounded, oldest entries evicted first
    pub emotional_trajectory: VecDeque<EmotionSample>,
    /// 0..=5, recomputed on every append
    pub current_risk_level: u8,
    pub crisis_mode: bool,
    pub active_alert_id: Option<String>,
    pub handoff: Option<HandoffRef>,
}

impl Session {
    pub fn new(session_id: impl Into<SessionId>, user_id: Option<UserId>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            started_at: now,
            last_activity_at: now,
            turns: Vec::new(),
            technique_usage_counts: BTreeMap::new(),
            emotional_trajectory: VecDeque::new(),
            current_risk_level: 0,
            crisis_mode: false,
            active_alert_id: None,
            handoff: None,
        }
    }

    /// Times a technique has been used in this session
    pub fn technique_count(&self, technique: &str) -> u32 {
        self.technique_usage_counts
            .get(technique)
            .copied()
            .unwrap_or(0)
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether the session has been idle for at least `ttl`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_activity_at >= ttl
    }

    /// Emotion with the highest summed intensity over the trajectory
    pub fn dominant_emotion(&self) -> Option<String> {
        let mut totals: BTreeMap<&str, f32> = BTreeMap::new();
        for sample in &self.emotional_trajectory {
            *totals.entry(sample.emotion.as_str()).or_insert(0.0) += sample.intensity;
        }
        totals
            .into_iter()
            .fold(None, |best: Option<(&str, f32)>, (emotion, total)| match best {
                Some((_, best_total)) if best_total >= total => best,
                _ => Some((emotion, total)),
            })
            .map(|(emotion, _)| emotion.to_string())
    }

    /// Read-only view for UI and analytics
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            turn_count: self.turns.len(),
            current_risk_level: self.current_risk_level,
            technique_usage: self.technique_usage_counts.clone(),
            crisis_mode: self.crisis_mode,
            active_alert_id: self.active_alert_id.clone(),
            dominant_emotion: self.dominant_emotion(),
            handoff: self.handoff.clone(),
        }
    }
}

/// Read-only session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turn_count: usize,
    pub current_risk_level: u8,
    pub technique_usage: BTreeMap<String, u32>,
    pub crisis_mode: bool,
    pub active_alert_id: Option<String>,
    pub dominant_emotion: Option<String>,
    pub handoff: Option<HandoffRef>,
}
