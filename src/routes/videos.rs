//! Video listing and streaming routes
//!
//! - GET /videos - every manifest, newest first, whatever its status
//! - GET /videos/:id - stream a complete video

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use futures::TryStreamExt;

use crate::download::DownloadError;
use crate::error::{ApiError, Result};
use crate::manifest::{FileId, FileManifest};
use crate::state::AppState;

/// GET /videos
pub async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<FileManifest>>> {
    let manifests = state.registry().list().await?;
    tracing::debug!(count = manifests.len(), "Listed videos");
    Ok(Json(manifests))
}

/// GET /videos/:id
///
/// Headers are sent before the first chunk is read, so a chunk failure after
/// that point can only abort the connection.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let file_id: FileId = id
        .parse()
        .map_err(|_| DownloadError::NotAvailable(format!("malformed id '{}'", id)))?;

    let download = state.downloads().open(file_id).await?;
    let manifest = download.manifest;

    let content_type = mime_guess::from_path(&manifest.filename).first_or_octet_stream();

    let body = Body::from_stream(download.chunks.inspect_err(move |e| {
        tracing::error!(file_id = %file_id, error = %e, "Stream error");
    }));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, manifest.length)
        .header(header::CONTENT_DISPOSITION, content_disposition(&manifest.filename))
        .header(header::ACCEPT_RANGES, "none");

    if let Some(digest) = &manifest.sha256 {
        response = response.header(header::ETAG, format!("\"{}\"", digest));
    }

    response
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `inline` disposition carrying the original filename
fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("clip.mp4"),
            "inline; filename=\"clip.mp4\"; filename*=UTF-8''clip.mp4"
        );
        assert_eq!(
            content_disposition("vidéo \"1\".mp4"),
            "inline; filename=\"vid_o _1_.mp4\"; filename*=UTF-8''vid%C3%A9o%20%221%22.mp4"
        );
    }
}
