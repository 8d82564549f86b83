//! Handoff to human responders

pub mod directory;
pub mod matcher;
pub mod queue;
pub mod types;

pub use directory::{
    find_responder, Availability, Responder, ResponderDirectory, SharedDirectory, StaticDirectory,
};
pub use matcher::HandoffMatcher;
pub use queue::{bucket_for, HandoffQueue, GENERAL_BUCKET};
pub use types::{HandoffCriteria, HandoffRequest, HandoffStatus, RequestId, ResponderId, Urgency};
