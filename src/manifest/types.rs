//! Manifest types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// File Identifier
// ============================================================================

/// Opaque identifier of a stored file.
///
/// Encoded as a lowercase hyphenated UUID wherever it leaves the process
/// (JSON bodies, URL path segments, storage keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Allocate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// Lifecycle state of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Upload in progress, chunks may be partial
    Pending,
    /// Every chunk written and the length recorded
    Complete,
    /// Upload aborted; chunks are purged or awaiting purge
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(RegistryError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// Metadata record describing one stored file.
///
/// Field names on the wire follow the chunked-bucket convention
/// (`_id`, `length`, `chunkSize`, `uploadDate`) so existing clients of the
/// listing endpoint keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifest {
    #[serde(rename = "_id")]
    pub id: FileId,

    pub filename: String,

    /// Total content length; 0 until the upload completes
    pub length: u64,

    pub chunk_size: usize,

    pub upload_date: DateTime<Utc>,

    pub metadata: BTreeMap<String, String>,

    pub status: FileStatus,

    /// Hex SHA-256 of the complete content, set on completion
    pub sha256: Option<String>,
}

impl FileManifest {
    /// Number of chunks a complete file of this length occupies
    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.length, self.chunk_size)
    }

    /// Expected byte length of chunk `sequence`
    pub fn chunk_len(&self, sequence: u64) -> usize {
        let offset = sequence.saturating_mul(self.chunk_size as u64);
        let remaining = self.length.saturating_sub(offset);
        remaining.min(self.chunk_size as u64) as usize
    }

    pub fn is_complete(&self) -> bool {
        self.status == FileStatus::Complete
    }
}

/// `ceil(length / chunk_size)`, with a zero-length file occupying no chunks
pub fn chunk_count(length: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    length.div_ceil(chunk_size as u64)
}

// ============================================================================
// Error Types
// ============================================================================

/// Manifest registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Manifest not found: {0}")]
    NotFound(FileId),

    #[error("Invalid transition for {file_id}: {from} -> {to}")]
    InvalidTransition {
        file_id: FileId,
        from: FileStatus,
        to: FileStatus,
    },

    #[error("Corrupt manifest record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
