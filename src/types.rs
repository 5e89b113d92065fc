#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier assigned by the remote document service.
pub type RemoteId = String;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("path strip error: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("rate limited: retry after {0:?}")]
    RateLimited(Option<std::time::Duration>),

    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("sync pass cancelled")]
    Cancelled,

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("front-matter nesting too deep (max {0})")]
    FrontMatterTooDeep(usize),
}

/// Status of a single note's binding to the remote, per SPEC_FULL.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    Conflict,
    Pending,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Pending => "pending",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "pending" => Ok(SyncStatus::Pending),
            "error" => Ok(SyncStatus::Error),
            other => Err(SyncError::Corruption(format!("unknown sync status {other:?}"))),
        }
    }
}

/// A single row in the state store, keyed by vault-relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub local_path: String,
    pub remote_id: Option<RemoteId>,
    pub full_hash: String,
    pub body_hash: String,
    pub frontmatter_hash: String,
    pub status: SyncStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
}

impl NoteRecord {
    /// A record for a note seen locally for the first time, not yet bound to any remote doc.
    pub fn new_pending(local_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_id: None,
            full_hash: String::new(),
            body_hash: String::new(),
            frontmatter_hash: String::new(),
            status: SyncStatus::Pending,
            last_sync: None,
            remote_mtime: None,
        }
    }

    /// Checks the invariants from SPEC_FULL.md §3. Used by tests and by the store on write.
    pub fn check_invariants(&self) -> Result<(), SyncError> {
        if self.status == SyncStatus::Synced {
            if self.full_hash.is_empty() || self.body_hash.is_empty() || self.frontmatter_hash.is_empty() {
                return Err(SyncError::Corruption(format!(
                    "synced record {:?} missing a content hash",
                    self.local_path
                )));
            }
            if self.remote_id.as_deref().unwrap_or("").is_empty() {
                return Err(SyncError::Corruption(format!(
                    "synced record {:?} has no remote_id",
                    self.local_path
                )));
            }
        }
        Ok(())
    }
}

/// A row in the link table: a symbolic reference discovered in one note, pointed at another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: i64,
    pub source_path: String,
    pub target_name: String,
    pub target_path: Option<String>,
    pub remote_id: Option<RemoteId>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasKind {
    Title,
    Explicit,
}

impl AliasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::Title => "title",
            AliasKind::Explicit => "explicit",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "title" => Ok(AliasKind::Title),
            "explicit" => Ok(AliasKind::Explicit),
            other => Err(SyncError::Corruption(format!("unknown alias kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasRecord {
    pub local_path: String,
    pub alias: String,
    pub kind: AliasKind,
}

/// Transient metadata about one remote document, as returned by C5/C6. Never persisted.
#[derive(Debug, Clone)]
pub struct RemotePageInfo {
    pub id: RemoteId,
    pub last_edited_time: DateTime<Utc>,
    pub archived: bool,
    pub error: Option<RemoteInfoError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteInfoError {
    NotFound,
    Other(String),
}

/// A file observed on disk during a vault walk (C3).
#[derive(Debug, Clone)]
pub struct VaultEntry {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// A dynamically-typed front-matter value, carried across the parser/transformer boundary.
///
/// Depth capped at [`FRONTMATTER_MAX_DEPTH`] per SPEC_FULL.md §9.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrontMatterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<FrontMatterValue>),
    Map(BTreeMap<String, FrontMatterValue>),
}

pub const FRONTMATTER_MAX_DEPTH: usize = 20;

impl FrontMatterValue {
    pub fn depth(&self) -> usize {
        match self {
            FrontMatterValue::Seq(items) => 1 + items.iter().map(FrontMatterValue::depth).max().unwrap_or(0),
            FrontMatterValue::Map(map) => 1 + map.values().map(FrontMatterValue::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Rejects values nested deeper than [`FRONTMATTER_MAX_DEPTH`], per the pathological-input cap.
    pub fn validate_depth(&self) -> Result<(), SyncError> {
        let d = self.depth();
        if d > FRONTMATTER_MAX_DEPTH {
            Err(SyncError::FrontMatterTooDeep(FRONTMATTER_MAX_DEPTH))
        } else {
            Ok(())
        }
    }
}

/// One row of the per-change outcome log the orchestrator (C8) returns to a caller.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub path: String,
    pub change_type: String,
    pub direction: String,
    pub result: OutcomeResult,
}

#[derive(Debug, Clone)]
pub enum OutcomeResult {
    Ok,
    Failed(String),
    Skipped(String),
}

/// Truncates a timestamp to second resolution, per SPEC_FULL.md's second-resolution rule.
pub fn truncate_to_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// Normalizes a path to vault-relative, forward-slash form.
pub fn normalize_path(p: &std::path::Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
