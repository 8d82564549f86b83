//! Session Store
//!
//! Per-conversation state
//!
//! Sessions are created on first touch and removed on explicit end or after
//! the inactivity TTL. Storage sits behind the [`SessionStore`] trait so the
//! in-memory default can be swapped for a shared backend.

pub mod locks;
pub mod risk;
pub mod store;
pub mod types;

pub use locks::SessionLocks;
pub use risk::{current_risk_level, decayed_risk};
pub use store::{InMemorySessionStore, SessionPolicy, SessionStore, SharedSessionStore};
pub use types::{EmotionSample, HandoffRef, Session, SessionId, SessionSnapshot, Turn, UserId};
