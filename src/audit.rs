//! Apply history
//!
//! Each apply attempt is appended to `<state dir>/history.log` as one JSON
//! line. History is best-effort: a failed write is logged and never fails the
//! apply that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const HISTORY_FILE_NAME: &str = "history.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    ApplyRules,
}

/// One recorded apply attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// ARM id of the target group
    pub resource_id: String,
    pub rule_count: usize,
    /// SHA-256 of the request body that was sent
    pub request_sha256: String,
    /// Set when the apply failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn apply(
        resource_id: impl Into<String>,
        rule_count: usize,
        request_sha256: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: EventType::ApplyRules,
            resource_id: resource_id.into(),
            rule_count,
            request_sha256: request_sha256.into(),
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Append-only JSON-lines history file
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// History file in the user's state directory, created on demand
    pub fn new() -> io::Result<Self> {
        let dir = crate::utils::ensure_state_dir()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no state directory"))?;
        Ok(Self::at(dir.join(HISTORY_FILE_NAME)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &HistoryEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await
    }

    /// Up to `count` entries, newest first. Lines that do not parse are
    /// skipped and a missing file reads as empty.
    pub async fn read_recent(&self, count: usize) -> io::Result<Vec<HistoryEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect())
    }
}

/// Records an apply attempt, warning instead of failing on write errors.
pub async fn log_apply(
    audit: &AuditLog,
    resource_id: &str,
    rule_count: usize,
    checksum: &str,
    error: Option<String>,
) {
    let entry = HistoryEntry::apply(resource_id, rule_count, checksum, error);
    if let Err(e) = audit.append(&entry).await {
        tracing::warn!("Failed to write apply history to {}: {e}", audit.path().display());
    }
}
