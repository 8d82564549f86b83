//! Emergency dispatch collaborator
//!
//! Invoked exactly once per escalated alert. A dispatch failure is logged
//! and published; the alert stays escalated.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::state::CrisisAlert;
use crate::error::TriageResult;

/// Shared reference to an EmergencyDispatcher
pub type SharedDispatcher = Arc<dyn EmergencyDispatcher>;

/// Emergency fallback path (emergency contact, on-call line, ...)
#[async_trait]
pub trait EmergencyDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &CrisisAlert) -> TriageResult<()>;

    fn name(&self) -> &str {
        "emergency"
    }
}

/// Logs the escalation at `error!`; the default when nothing is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl EmergencyDispatcher for LoggingDispatcher {
    async fn dispatch(&self, alert: &CrisisAlert) -> TriageResult<()> {
        error!(
            alert_id = %alert.alert_id,
            session_id = %alert.session_id,
            severity = alert.severity,
            "EMERGENCY: crisis alert escalated without acknowledgement"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
