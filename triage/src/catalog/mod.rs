//! Protocol Catalog
//!
//! Static, versioned set of response protocols
//!
//! Loaded once at startup and shared read-only. Declaration order is
//! significant: it is the final tie-break when the classifier ranks
//! candidates.
//!
//! # Invariants
//!
//! - protocol ids are unique
//! - every protocol has at least one keyword
//! - severity is within 1..=5
//! - `is_crisis` holds exactly when severity >= 4
//!
//! # Usage
//!
//! ```ignore
//! use triage::catalog::Catalog;
//!
//! let catalog = Catalog::builtin()?;
//! let custom = Catalog::load("./protocols.toml")?;
//! ```

pub mod types;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{TriageError, TriageResult};
use crate::text::normalize;

pub use types::{CatalogDocument, FallbackResponse, Protocol, ProtocolCategory, ProtocolId};

/// Severity at which a protocol must be crisis-flagged, and below which it must not be
pub const MIN_CRISIS_SEVERITY: u8 = 4;

const BUILTIN_CATALOG: &str = include_str!("../../protocols/default.toml");

/// Shared reference to a Catalog
pub type SharedCatalog = Arc<Catalog>;

/// Validated, ordered protocol catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    version: String,
    protocols: Vec<Protocol>,
    index: HashMap<ProtocolId, usize>,
    fallback: FallbackResponse,
}

impl Catalog {
    /// Build a catalog, normalizing keywords and enforcing every invariant
    pub fn new(
        version: impl Into<String>,
        protocols: Vec<Protocol>,
        fallback: FallbackResponse,
    ) -> TriageResult<Self> {
        let mut index = HashMap::with_capacity(protocols.len());
        let mut normalized = Vec::with_capacity(protocols.len());

        for (position, mut protocol) in protocols.into_iter().enumerate() {
            if protocol.id.trim().is_empty() {
                return Err(TriageError::InvalidCatalog(format!(
                    "protocol at position {} has an empty id",
                    position
                )));
            }
            if index.insert(protocol.id.clone(), position).is_some() {
                return Err(TriageError::InvalidCatalog(format!(
                    "duplicate protocol id '{}'",
                    protocol.id
                )));
            }
            if !(1..=5).contains(&protocol.severity) {
                return Err(TriageError::InvalidCatalog(format!(
                    "protocol '{}' severity {} outside 1..=5",
                    protocol.id, protocol.severity
                )));
            }
            if protocol.is_crisis && protocol.severity < MIN_CRISIS_SEVERITY {
                return Err(TriageError::InvalidCatalog(format!(
                    "crisis protocol '{}' has severity {} (< {})",
                    protocol.id, protocol.severity, MIN_CRISIS_SEVERITY
                )));
            }
            if !protocol.is_crisis && protocol.severity >= MIN_CRISIS_SEVERITY {
                return Err(TriageError::InvalidCatalog(format!(
                    "protocol '{}' has severity {} but is not flagged is_crisis",
                    protocol.id, protocol.severity
                )));
            }

            let mut seen = HashSet::new();
            protocol.keywords = protocol
                .keywords
                .iter()
                .map(|k| normalize(k))
                .filter(|k| !k.is_empty())
                .filter(|k| seen.insert(k.clone()))
                .collect();
            if protocol.keywords.is_empty() {
                return Err(TriageError::InvalidCatalog(format!(
                    "protocol '{}' has no keywords",
                    protocol.id
                )));
            }

            normalized.push(protocol);
        }

        let catalog = Self {
            version: version.into(),
            protocols: normalized,
            index,
            fallback,
        };
        debug!(
            version = %catalog.version,
            protocols = catalog.protocols.len(),
            "Protocol catalog loaded"
        );
        Ok(catalog)
    }

    /// The catalog shipped with the crate
    pub fn builtin() -> TriageResult<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Parse and validate a TOML catalog document
    pub fn from_toml_str(raw: &str) -> TriageResult<Self> {
        let doc: CatalogDocument =
            toml::from_str(raw).map_err(|e| TriageError::InvalidCatalog(e.to_string()))?;
        Self::new(doc.version, doc.protocols, doc.fallback)
    }

    /// Load a TOML catalog from disk
    pub fn load(path: impl AsRef<Path>) -> TriageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TriageError::InvalidCatalog(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Create a shared reference to this catalog
    pub fn shared(self) -> SharedCatalog {
        Arc::new(self)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Protocols in declaration order
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn get(&self, id: &str) -> Option<&Protocol> {
        self.index.get(id).map(|&i| &self.protocols[i])
    }

    /// Declaration position of a protocol
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn fallback(&self) -> &FallbackResponse {
        &self.fallback
    }

    pub fn crisis_protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter().filter(|p| p.is_crisis)
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}
