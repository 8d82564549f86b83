//! Triage error types
//!
//! One taxonomy for the whole core. Callers decide how loud to be with
//! [`TriageError::is_benign`] and [`TriageError::is_fatal`]:
//!
//! - `Validation` is rejected synchronously to the caller.
//! - `NotFound` is expected when acknowledgement races resolution or expiry.
//! - `UpstreamUnavailable` degrades the turn instead of failing it.
//! - `TimerUnavailable` is fatal. A crisis countdown that cannot be armed must
//!   never be skipped silently.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for triage operations
pub type TriageResult<T> = Result<T, TriageError>;

/// Errors that can occur in the triage core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriageError {
    /// Malformed input (missing session id, bad criteria, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown alert, handoff or session id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A collaborator (sentiment scorer, responder directory) failed
    #[error("Upstream unavailable ({service}): {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// The countdown for a crisis alert could not be armed
    #[error("Escalation timer unavailable for alert {alert_id}: {message}")]
    TimerUnavailable { alert_id: String, message: String },

    /// Catalog violates a protocol invariant or failed to parse
    #[error("Invalid protocol catalog: {0}")]
    InvalidCatalog(String),

    /// A state machine refused a transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Archive sink failed to persist a record
    #[error("Archive error: {0}")]
    Archive(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TriageError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for the given entity kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an upstream error for a named collaborator
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the error should be reported but otherwise ignored
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the process must stop rather than continue without escalation
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TimerUnavailable { .. })
    }

    /// Machine-readable error code for the command surface
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::TimerUnavailable { .. } => "TIMER_UNAVAILABLE",
            Self::InvalidCatalog(_) => "INVALID_CATALOG",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Archive(_) => "ARCHIVE",
            Self::Config(_) => "CONFIG",
        }
    }

    /// Render as a structured payload
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code().to_string(),
            message: self.to_string(),
            benign: self.is_benign(),
            fatal: self.is_fatal(),
        }
    }
}

/// Structured error payload for callers that speak JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code (e.g. "NOT_FOUND")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Reported but harmless (expected races)
    #[serde(default)]
    pub benign: bool,
    /// The caller must stop
    #[serde(default)]
    pub fatal: bool,
}
