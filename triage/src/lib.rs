//! Conversational Triage Core
//!
//! This library provides:
//! - a versioned protocol catalog and a deterministic message classifier
//! - per-session state with bounded emotional history and decaying risk
//! - crisis alerts with a timed, exactly-once escalation path
//! - notification fan-out and handoff to human responders
//!
//! # Pipeline
//!
//! ```text
//! inbound message
//!   → MessageClassifier (catalog + session view + sentiment)
//!   → SessionStore::append_turn
//!   → risk ≥ threshold? CrisisEscalationEngine::raise
//!   → NotificationBus::publish
//!   → HandoffMatcher::request_handoff
//!   → outcome recorded on the session
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use triage::{TriageConfig, TriageService};
//!
//! let service = TriageService::builder(TriageConfig::from_env()).build()?;
//! let outcome = service.handle_message("session-1", None, "I can't sleep").await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod archive;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod handoff;
pub mod resilience;
pub mod service;
pub mod session;
pub mod text;

pub use config::TriageConfig;
pub use error::{StructuredError, TriageError, TriageResult};
pub use resilience::{Degraded, DegradationLevel};
pub use service::{MaintenanceReport, TriageService, TriageServiceBuilder, TurnOutcome};

// Re-export key catalog and classifier types
pub use catalog::{Catalog, Protocol, ProtocolCategory, SharedCatalog};
pub use classifier::{
    ClassificationResult, LexiconSentimentScorer, MessageClassifier, SentimentScore,
    SentimentScorer,
};

// Re-export key session types
pub use session::{
    InMemorySessionStore, Session, SessionSnapshot, SessionStore, SharedSessionStore, Turn,
};

// Re-export key escalation types
pub use escalation::{
    AlertOutcome, AlertStatus, CrisisAlert, CrisisEscalationEngine, EmergencyDispatcher,
    LoggingDispatcher, TransitionOutcome,
};

// Re-export key event types
pub use events::{EventFilter, NotificationBus, SharedNotificationBus, Subscription, TriageEvent};

// Re-export key handoff types
pub use handoff::{
    Availability, HandoffCriteria, HandoffMatcher, HandoffRequest, HandoffStatus, Responder,
    ResponderDirectory, StaticDirectory, Urgency,
};

pub use archive::{ArchiveRecord, ArchiveSink, JsonlArchive, MemoryArchive, NullArchive};
