//! Triage policy configuration
//!
//! Defaults are product constants (120 s acknowledgement window, 10 minutes
//! per queued request). They are configurable but should only change with
//! clinical sign-off.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TriageError, TriageResult};

/// Longest accepted session inactivity TTL (one year)
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
/// Longest accepted wait for a queued handoff (one week)
pub const MAX_HANDOFF_EXPIRY_MINUTES: i64 = 7 * 24 * 60;

/// Policy knobs for the whole triage pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Risk score at or above which a crisis alert opens
    pub escalation_threshold: u8,
    /// Seconds an active alert waits for acknowledgement before escalating
    pub ack_timeout_secs: u64,
    /// Maximum entries kept in a session's emotional trajectory
    pub trajectory_capacity: usize,
    /// Trailing turns that count at full weight for the session risk level
    pub risk_window_turns: usize,
    /// Turns beyond the window over which an old risk decays linearly to 0
    pub risk_decay_turns: usize,
    /// Hours of inactivity after which a session is archived
    pub session_ttl_hours: i64,
    /// Minutes per queue position used for wait estimates
    pub average_service_minutes: u32,
    /// Minutes a queued handoff may wait before it expires
    pub handoff_expiry_minutes: i64,
    /// Seconds between maintenance sweeps
    pub maintenance_interval_secs: u64,
    /// Specialty requested for handoffs opened by a crisis alert
    pub crisis_specialty: String,
    /// Per-subscriber buffer for targeted and filtered notifications
    pub subscriber_buffer: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 4,
            ack_timeout_secs: 120,
            trajectory_capacity: 100,
            risk_window_turns: 5,
            risk_decay_turns: 5,
            session_ttl_hours: 24,
            average_service_minutes: 10,
            handoff_expiry_minutes: 30,
            maintenance_interval_secs: 30,
            crisis_specialty: "crisis".to_string(),
            subscriber_buffer: 64,
        }
    }
}

impl TriageConfig {
    /// Defaults overridden by `TRIAGE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(raw: &str) -> TriageResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| TriageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> TriageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TriageError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Apply `TRIAGE_*` environment overrides in place
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse("TRIAGE_ESCALATION_THRESHOLD") {
            self.escalation_threshold = n;
        }
        if let Some(n) = env_parse("TRIAGE_ACK_TIMEOUT_SECS") {
            self.ack_timeout_secs = n;
        }
        if let Some(n) = env_parse("TRIAGE_TRAJECTORY_CAPACITY") {
            self.trajectory_capacity = n;
        }
        if let Some(n) = env_parse("TRIAGE_RISK_WINDOW") {
            self.risk_window_turns = n;
        }
        if let Some(n) = env_parse("TRIAGE_RISK_DECAY") {
            self.risk_decay_turns = n;
        }
        if let Some(n) = env_parse("TRIAGE_SESSION_TTL_HOURS") {
            self.session_ttl_hours = n;
        }
        if let Some(n) = env_parse("TRIAGE_AVG_SERVICE_MINUTES") {
            self.average_service_minutes = n;
        }
        if let Some(n) = env_parse("TRIAGE_HANDOFF_EXPIRY_MINUTES") {
            self.handoff_expiry_minutes = n;
        }
        if let Some(n) = env_parse("TRIAGE_MAINTENANCE_INTERVAL_SECS") {
            self.maintenance_interval_secs = n;
        }
        if let Ok(specialty) = std::env::var("TRIAGE_CRISIS_SPECIALTY") {
            self.crisis_specialty = specialty;
        }
    }

    /// Reject values that would disable a safety mechanism
    pub fn validate(&self) -> TriageResult<()> {
        if !(1..=5).contains(&self.escalation_threshold) {
            return Err(TriageError::Config(format!(
                "escalation_threshold must be 1..=5, got {}",
                self.escalation_threshold
            )));
        }
        if self.ack_timeout_secs == 0 {
            return Err(TriageError::Config(
                "ack_timeout_secs must be positive".to_string(),
            ));
        }
        if self.risk_window_turns == 0 {
            return Err(TriageError::Config(
                "risk_window_turns must be positive".to_string(),
            ));
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.session_ttl_hours) {
            return Err(TriageError::Config(format!(
                "session_ttl_hours must be 1..={}, got {}",
                MAX_SESSION_TTL_HOURS, self.session_ttl_hours
            )));
        }
        if !(1..=MAX_HANDOFF_EXPIRY_MINUTES).contains(&self.handoff_expiry_minutes) {
            return Err(TriageError::Config(format!(
                "handoff_expiry_minutes must be 1..={}, got {}",
                MAX_HANDOFF_EXPIRY_MINUTES, self.handoff_expiry_minutes
            )));
        }
        if self.trajectory_capacity == 0 || self.subscriber_buffer == 0 {
            return Err(TriageError::Config(
                "trajectory_capacity and subscriber_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Acknowledgement window as a duration
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Session inactivity TTL, clamped to the accepted range
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS))
    }

    /// Maximum wait for a queued handoff, clamped to the accepted range
    pub fn handoff_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(
            self.handoff_expiry_minutes
                .clamp(1, MAX_HANDOFF_EXPIRY_MINUTES),
        )
    }

    /// Interval between maintenance sweeps
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
