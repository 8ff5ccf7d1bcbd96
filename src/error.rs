//! Error types for the VidVault server
//!
//! Component errors are mapped to HTTP here. Bodies are short plain-text
//! sentences that existing clients match on; details go to the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::download::DownloadError;
use crate::manifest::RegistryError;
use crate::upload::UploadError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, ApiError>;

/// HTTP boundary error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Listing failed: {0}")]
    Listing(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Upload(e) => e.status_code(),
            ApiError::Download(e) => e.status_code(),
            ApiError::Listing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ApiError::Upload(UploadError::NoFileProvided) => "No file uploaded.",
            ApiError::Upload(_) => "An error occurred during file upload.",
            ApiError::Download(DownloadError::NotAvailable(_)) => "Video not found.",
            ApiError::Listing(_) => "An error occurred while fetching videos.",
            ApiError::Download(_) | ApiError::Internal(_) => "An internal server error occurred.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ApiError::Upload(UploadError::NoFileProvided) => {
                tracing::debug!("Upload request without a file");
            }
            ApiError::Download(DownloadError::NotAvailable(reason)) => {
                tracing::debug!("Video not found: {}", reason);
            }
            ApiError::Upload(e) => tracing::error!("Upload error: {}", e),
            ApiError::Listing(e) => tracing::error!("Fetch error: {}", e),
            other => tracing::error!("Server error: {}", other),
        }

        (status, self.message()).into_response()
    }
}
