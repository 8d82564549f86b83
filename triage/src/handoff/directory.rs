//! Responder directory collaborator
//!
//! The directory is consumed, not owned. [`StaticDirectory`] serves a TOML
//! roster for the daemon and for tests.

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::ResponderId;
use crate::error::{TriageError, TriageResult};

/// Shared reference to a ResponderDirectory
pub type SharedDirectory = Arc<dyn ResponderDirectory>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Immediate,
    Busy,
    Offline,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Directory entry for a human responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responder {
    pub id: ResponderId,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub availability: Availability,
    #[serde(default)]
    pub estimated_wait_minutes: u32,
}

impl Responder {
    pub fn new(id: impl Into<String>, availability: Availability) -> Self {
        Self {
            id: id.into(),
            specialties: Vec::new(),
            languages: Vec::new(),
            availability,
            estimated_wait_minutes: 0,
        }
    }

    pub fn with_specialties(mut self, specialties: &[&str]) -> Self {
        self.specialties = specialties.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_wait(mut self, minutes: u32) -> Self {
        self.estimated_wait_minutes = minutes;
        self
    }

    pub fn has_specialty(&self, specialty: &str) -> bool {
        self.specialties.iter().any(|s| s.eq_ignore_ascii_case(specialty))
    }

    pub fn speaks(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Responder lookup. Order of the returned list is the tie-break order.
#[async_trait]
pub trait ResponderDirectory: Send + Sync {
    async fn list_responders(&self) -> TriageResult<Vec<Responder>>;
}

/// Look a single responder up in a directory listing
pub async fn find_responder(
    directory: &dyn ResponderDirectory,
    responder_id: &str,
) -> TriageResult<Responder> {
    directory
        .list_responders()
        .await?
        .into_iter()
        .find(|r| r.id == responder_id)
        .ok_or_else(|| TriageError::not_found("responder", responder_id))
}

#[derive(Debug, Default, Deserialize)]
struct RosterDocument {
    #[serde(default)]
    responders: Vec<Responder>,
}

/// In-memory roster with mutable availability
#[derive(Debug, Default)]
pub struct StaticDirectory {
    responders: RwLock<Vec<Responder>>,
}

impl StaticDirectory {
    pub fn new(responders: Vec<Responder>) -> Self {
        Self {
            responders: RwLock::new(responders),
        }
    }

    /// Parse a `[[responders]]` TOML roster
    pub fn from_toml_str(raw: &str) -> TriageResult<Self> {
        let doc: RosterDocument =
            toml::from_str(raw).map_err(|e| TriageError::Config(format!("roster: {}", e)))?;
        let mut seen = std::collections::HashSet::new();
        for r in &doc.responders {
            if r.id.trim().is_empty() {
                return Err(TriageError::Config("roster: responder id is empty".into()));
            }
            if !seen.insert(r.id.as_str()) {
                return Err(TriageError::Config(format!(
                    "roster: duplicate responder id {}",
                    r.id
                )));
            }
        }
        debug!(count = doc.responders.len(), "Responder roster loaded");
        Ok(Self::new(doc.responders))
    }

    pub fn load(path: impl AsRef<Path>) -> TriageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TriageError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Update a responder's availability; returns false for unknown ids
    pub fn set_availability(&self, responder_id: &str, availability: Availability) -> bool {
        let mut responders = self.responders.write().unwrap_or_else(|e| e.into_inner());
        match responders.iter_mut().find(|r| r.id == responder_id) {
            Some(r) => {
                r.availability = availability;
                true
            }
            None => false,
        }
    }

    pub fn upsert(&self, responder: Responder) {
        let mut responders = self.responders.write().unwrap_or_else(|e| e.into_inner());
        match responders.iter_mut().find(|r| r.id == responder.id) {
            Some(existing) => *existing = responder,
            None => responders.push(responder),
        }
    }

    pub fn len(&self) -> usize {
        self.responders.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponderDirectory for StaticDirectory {
    async fn list_responders(&self) -> TriageResult<Vec<Responder>> {
        Ok(self
            .responders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
