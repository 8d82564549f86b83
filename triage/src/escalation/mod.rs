//! Crisis Escalation
//!
//! Timed state machine per crisis event
//!
//! ```text
//! high-risk turn
//!     │
//!     ├─ session has an active alert → merge (max severity, union of evidence)
//!     └─ otherwise → open alert, publish, arm countdown (default 120 s)
//!                         │
//!         acknowledge / user is safe ──► resolved   (countdown cancelled)
//!         countdown elapsed ───────────► escalated  (emergency dispatch, once)
//! ```
//!
//! Terminal alerts are never reopened. A later high-risk turn opens a new one.

pub mod dispatch;
pub mod engine;
pub mod state;

pub use dispatch::{EmergencyDispatcher, LoggingDispatcher, SharedDispatcher};
pub use engine::{AlertOutcome, CrisisEscalationEngine, CrisisSignal, TransitionOutcome};
pub use state::{
    AlertId, AlertStatus, CrisisAlert, Indicator, LateAcknowledgement, Resolution, Transition,
};
