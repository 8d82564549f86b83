//! Archive sink
//!
//! Write-only persistence of finished state
//!
//! Ended sessions, terminal alerts and closed handoffs are handed to an
//! [`ArchiveSink`]. The core never reads them back. A failing sink costs a
//! warning, never a turn.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{TriageError, TriageResult};
use crate::escalation::CrisisAlert;
use crate::handoff::HandoffRequest;
use crate::session::Session;

/// Shared reference to an ArchiveSink
pub type SharedArchive = Arc<dyn ArchiveSink>;

/// One archived entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum ArchiveRecord {
    Session(Session),
    Alert(CrisisAlert),
    Handoff(HandoffRequest),
}

impl ArchiveRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Alert(_) => "alert",
            Self::Handoff(_) => "handoff",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Session(s) => &s.session_id,
            Self::Alert(a) => &a.alert_id,
            Self::Handoff(h) => &h.request_id,
        }
    }
}

/// A record wrapped with its archive time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub archived_at: DateTime<Utc>,
    pub entry: ArchiveRecord,
}

/// Write-only persistence collaborator
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn archive(&self, record: ArchiveRecord) -> TriageResult<()>;
}

/// Archive and log on failure
pub async fn archive_or_warn(sink: &dyn ArchiveSink, record: ArchiveRecord) {
    let kind = record.kind();
    let id = record.id().to_string();
    if let Err(e) = sink.archive(record).await {
        warn!(kind, id = %id, error = %e, "Failed to archive record");
    }
}

/// Appends one JSON object per line
pub struct JsonlArchive {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlArchive {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ArchiveSink for JsonlArchive {
    async fn archive(&self, record: ArchiveRecord) -> TriageResult<()> {
        let kind = record.kind();
        let entry = ArchiveEntry {
            archived_at: Utc::now(),
            entry: record,
        };
        let mut line =
            serde_json::to_string(&entry).map_err(|e| TriageError::Archive(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| TriageError::Archive(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TriageError::Archive(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| TriageError::Archive(e.to_string()))?;

        debug!(kind, path = %self.path.display(), "Record archived");
        Ok(())
    }
}

/// Keeps records in memory; used by tests and the daemon's dry-run mode
#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: Mutex<Vec<ArchiveRecord>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn archive(&self, record: ArchiveRecord) -> TriageResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullArchive;

#[async_trait]
impl ArchiveSink for NullArchive {
    async fn archive(&self, _record: ArchiveRecord) -> TriageResult<()> {
        Ok(())
    }
}
