//! Protocol types

use serde::{Deserialize, Serialize};

/// Protocol identifier (unique within a catalog)
pub type ProtocolId = String;

/// Therapeutic category a protocol belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolCategory {
    Crisis,
    Anxiety,
    Depression,
    Anger,
    Sleep,
    Cognition,
    Stress,
    Relationships,
    Positive,
}

impl std::fmt::Display for ProtocolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crisis => write!(f, "crisis"),
            Self::Anxiety => write!(f, "anxiety"),
            Self::Depression => write!(f, "depression"),
            Self::Anger => write!(f, "anger"),
            Self::Sleep => write!(f, "sleep"),
            Self::Cognition => write!(f, "cognition"),
            Self::Stress => write!(f, "stress"),
            Self::Relationships => write!(f, "relationships"),
            Self::Positive => write!(f, "positive"),
        }
    }
}

/// A catalog entry pairing trigger keywords with a response protocol.
///
/// Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: ProtocolId,
    pub category: ProtocolCategory,
    /// Lowercase phrases, normalized on load
    pub keywords: Vec<String>,
    /// 1..=5, 5 = acute crisis
    pub severity: u8,
    pub response_template: String,
    /// Technique label, counted per session
    pub technique: String,
    pub follow_up_prompt: String,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    /// Matching this protocol opens a crisis alert
    #[serde(default)]
    pub is_crisis: bool,
}

/// Generic supportive response used when nothing in the catalog matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub response_template: String,
    pub technique: String,
    pub follow_up_prompt: String,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
}

impl Default for FallbackResponse {
    fn default() -> Self {
        Self {
            response_template: "Thank you for telling me. I'm here and listening.".to_string(),
            technique: "active listening".to_string(),
            follow_up_prompt: "Would you like to tell me more about what's on your mind?"
                .to_string(),
            suggested_tools: Vec::new(),
        }
    }
}

/// Raw catalog document as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    #[serde(default)]
    pub fallback: FallbackResponse,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
}
