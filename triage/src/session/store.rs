//! Session Store
//!
//! Injectable per-conversation state
//!
//! [`SessionStore`] is the seam; [`InMemorySessionStore`] is the default
//! implementation. Each session sits behind its own mutex so appends are
//! atomic per session while distinct sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::risk::current_risk_level;
use super::types::{EmotionSample, HandoffRef, Session, SessionSnapshot, Turn};
use crate::config::TriageConfig;
use crate::error::{TriageError, TriageResult};

/// Shared reference to a SessionStore
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Retention and risk policy applied by a store
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub trajectory_capacity: usize,
    pub risk_window_turns: usize,
    pub risk_decay_turns: usize,
    pub ttl: chrono::Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&TriageConfig::default())
    }
}

impl SessionPolicy {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            trajectory_capacity: config.trajectory_capacity,
            risk_window_turns: config.risk_window_turns,
            risk_decay_turns: config.risk_decay_turns,
            ttl: config.session_ttl(),
        }
    }
}

/// Per-session state store.
///
/// Mutating operations on an unknown session id create the session; first
/// touch of an anonymous conversation is the normal case.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, creating it on first touch
    async fn get_or_create(&self, session_id: &str, user_id: Option<&str>)
        -> TriageResult<Session>;

    /// Fetch without creating
    async fn get(&self, session_id: &str) -> TriageResult<Option<Session>>;

    /// Append a turn; the store assigns `turn_index` and recomputes the risk level
    async fn append_turn(&self, session_id: &str, turn: Turn) -> TriageResult<Session>;

    /// Push onto the bounded emotional trajectory
    async fn record_emotion(&self, session_id: &str, emotion: &str, intensity: f32)
        -> TriageResult<()>;

    /// Count one more use of a technique; returns the new count
    async fn increment_technique(&self, session_id: &str, technique: &str) -> TriageResult<u32>;

    /// Enter or leave crisis mode, tracking the alert that caused it
    async fn set_crisis_mode(
        &self,
        session_id: &str,
        crisis_mode: bool,
        alert_id: Option<String>,
    ) -> TriageResult<()>;

    /// Record the latest handoff outcome
    async fn record_handoff(&self, session_id: &str, handoff: HandoffRef) -> TriageResult<()>;

    /// Read-only summary, `None` for unknown sessions
    async fn snapshot(&self, session_id: &str) -> TriageResult<Option<SessionSnapshot>>;

    /// Remove a session, returning it for archiving
    async fn end_session(&self, session_id: &str) -> TriageResult<Option<Session>>;

    /// Ids of sessions idle past the TTL at `now`
    async fn idle_session_ids(&self, now: DateTime<Utc>) -> Vec<String>;

    /// Remove one session if it is still idle past the TTL, returning it for archiving
    async fn expire_if_idle(&self, session_id: &str, now: DateTime<Utc>)
        -> TriageResult<Option<Session>>;

    /// Remove every session idle past the TTL
    async fn sweep_expired(&self, now: DateTime<Utc>) -> TriageResult<Vec<Session>> {
        let mut expired = Vec::new();
        for id in self.idle_session_ids(now).await {
            if let Some(session) = self.expire_if_idle(&id, now).await? {
                expired.push(session);
            }
        }
        Ok(expired)
    }

    /// Number of live sessions
    async fn session_count(&self) -> usize;
}

/// In-memory session store with per-session locking
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    policy: SessionPolicy,
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn shared(self) -> SharedSessionStore {
        Arc::new(self)
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    fn validate_id(session_id: &str) -> TriageResult<()> {
        if session_id.trim().is_empty() {
            return Err(TriageError::validation("session_id must not be empty"));
        }
        Ok(())
    }

    /// Handle to a session's cell, created on first touch
    async fn cell(&self, session_id: &str, user_id: Option<&str>) -> TriageResult<Arc<Mutex<Session>>> {
        Self::validate_id(session_id)?;

        if let Some(cell) = self.sessions.read().await.get(session_id) {
            return Ok(Arc::clone(cell));
        }

        let mut sessions = self.sessions.write().await;
        let cell = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "Session created");
            Arc::new(Mutex::new(Session::new(
                session_id,
                user_id.map(str::to_string),
            )))
        });
        Ok(Arc::clone(cell))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> TriageResult<Session> {
        let cell = self.cell(session_id, user_id).await?;
        let mut session = cell.lock().await;
        if session.user_id.is_none() {
            session.user_id = user_id.map(str::to_string);
        }
        session.last_activity_at = session.last_activity_at.max(Utc::now());
        Ok(session.clone())
    }

    async fn get(&self, session_id: &str) -> TriageResult<Option<Session>> {
        let cell = self.sessions.read().await.get(session_id).cloned();
        match cell {
            Some(cell) => Ok(Some(cell.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn append_turn(&self, session_id: &str, mut turn: Turn) -> TriageResult<Session> {
        let cell = self.cell(session_id, None).await?;
        let mut session = cell.lock().await;

        turn.turn_index = session.turns.len() as u64;
        session.last_activity_at = Utc::now().max(turn.timestamp);
        session.turns.push(turn);
        session.current_risk_level = current_risk_level(
            &session.turns,
            self.policy.risk_window_turns,
            self.policy.risk_decay_turns,
        );

        Ok(session.clone())
    }

    async fn record_emotion(
        &self,
        session_id: &str,
        emotion: &str,
        intensity: f32,
    ) -> TriageResult<()> {
        let cell = self.cell(session_id, None).await?;
        let mut session = cell.lock().await;

        session.emotional_trajectory.push_back(EmotionSample {
            emotion: emotion.to_string(),
            intensity: intensity.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        });
        while session.emotional_trajectory.len() > self.policy.trajectory_capacity {
            session.emotional_trajectory.pop_front();
        }
        Ok(())
    }

    async fn increment_technique(&self, session_id: &str, technique: &str) -> TriageResult<u32> {
        let cell = self.cell(session_id, None).await?;
        let mut session = cell.lock().await;
        let count = session
            .technique_usage_counts
            .entry(technique.to_string())
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn set_crisis_mode(
        &self,
        session_id: &str,
        crisis_mode: bool,
        alert_id: Option<String>,
    ) -> TriageResult<()> {
        let cell = self.cell(session_id, None).await?;
        let mut session = cell.lock().await;
        session.crisis_mode = crisis_mode;
        session.active_alert_id = alert_id;
        Ok(())
    }

    async fn record_handoff(&self, session_id: &str, handoff: HandoffRef) -> TriageResult<()> {
        let cell = self.cell(session_id, None).await?;
        cell.lock().await.handoff = Some(handoff);
        Ok(())
    }

    async fn snapshot(&self, session_id: &str) -> TriageResult<Option<SessionSnapshot>> {
        Ok(self.get(session_id).await?.map(|s| s.snapshot()))
    }

    async fn end_session(&self, session_id: &str) -> TriageResult<Option<Session>> {
        let cell = self.sessions.write().await.remove(session_id);
        match cell {
            Some(cell) => {
                debug!(session_id, "Session ended");
                Ok(Some(cell.lock().await.clone()))
            }
            None => Ok(None),
        }
    }

    async fn idle_session_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let cells: Vec<(String, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();

        let mut idle = Vec::new();
        for (id, cell) in cells {
            if cell.lock().await.is_expired(now, self.policy.ttl) {
                idle.push(id);
            }
        }
        idle
    }

    async fn expire_if_idle(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> TriageResult<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        let Some(cell) = sessions.get(session_id).cloned() else {
            return Ok(None);
        };
        let session = cell.lock().await;
        // Activity may have landed since the idle scan
        if !session.is_expired(now, self.policy.ttl) {
            return Ok(None);
        }
        let expired = session.clone();
        drop(session);
        sessions.remove(session_id);
        debug!(session_id, "Idle session expired");
        Ok(Some(expired))
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
