//! Resilience
//!
//! Degraded mode for collaborator failures
//!
//! When the sentiment scorer or the responder directory fails, the turn is
//! not failed. The call site gets a degraded value plus warnings instead:
//!
//! ```text
//! collaborator call
//!   ├─ succeeds → Degraded { level: Full, value: Some(..) }
//!   └─ fails    → Degraded { level: Partial, value: None, warnings: [..] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TriageResult;

/// How much of the pipeline's inputs were available
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every collaborator answered.
    Full,
    /// At least one collaborator failed; a fallback path was used.
    Partial,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// A collaborator result wrapped with degradation metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Degraded<T> {
    pub value: T,
    pub level: DegradationLevel,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> Degraded<T> {
    pub fn full(value: T) -> Self {
        Self {
            value,
            level: DegradationLevel::Full,
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn partial(value: T, warning: impl Into<String>) -> Self {
        Self {
            value,
            level: DegradationLevel::Partial,
            warnings: vec![warning.into()],
            timestamp: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }

    pub fn into_parts(self) -> (T, DegradationLevel, Vec<String>) {
        (self.value, self.level, self.warnings)
    }
}

impl<T> Degraded<Option<T>> {
    /// Turn a collaborator result into an optional value; failures are
    /// logged and become a partial response.
    pub fn from_result(service: &str, result: TriageResult<T>) -> Self {
        match result {
            Ok(value) => Self::full(Some(value)),
            Err(e) => {
                warn!(service, error = %e, "Collaborator unavailable, degrading");
                Self::partial(None, format!("{} unavailable: {}", service, e))
            }
        }
    }
}

impl<T> Degraded<Vec<T>> {
    /// Like [`Degraded::from_result`] but falls back to an empty list
    pub fn list_from_result(service: &str, result: TriageResult<Vec<T>>) -> Self {
        match result {
            Ok(value) => Self::full(value),
            Err(e) => {
                warn!(service, error = %e, "Collaborator unavailable, degrading");
                Self::partial(Vec::new(), format!("{} unavailable: {}", service, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError;

    #[test]
    fn test_success_is_full() {
        let d = Degraded::from_result("sentiment", Ok(3));
        assert_eq!(d.value, Some(3));
        assert!(!d.is_degraded());
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn test_failure_is_partial_with_warning() {
        let d: Degraded<Option<u8>> =
            Degraded::from_result("sentiment", Err(TriageError::upstream("sentiment", "timeout")));
        assert_eq!(d.value, None);
        assert_eq!(d.level, DegradationLevel::Partial);
        assert!(d.warnings[0].contains("timeout"));
    }

    #[test]
    fn test_list_failure_is_empty() {
        let d: Degraded<Vec<u8>> =
            Degraded::list_from_result("directory", Err(TriageError::upstream("directory", "503")));
        assert!(d.value.is_empty());
        assert!(d.is_degraded());
    }
}
