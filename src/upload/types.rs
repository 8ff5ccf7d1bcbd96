//! Upload types

use std::time::Duration;

use serde::Serialize;

use crate::manifest::FileId;

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 255 KiB, the customary chunked-bucket size
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

// ============================================================================
// Options & Results
// ============================================================================

/// Tuning for the upload coordinator
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// A finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub total_bytes: u64,
    pub chunk_count: u64,
    pub sha256: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    NoFileProvided,

    #[error("Upload write failed: {0}")]
    WriteFailure(String),

    #[error("Upload stream failed: {0}")]
    StreamFailure(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NoFileProvided => StatusCode::BAD_REQUEST,
            Self::WriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
