//! Upload Routes
//!
//! - POST /upload - multipart form with a `video` file part and optional
//!   `title` / `description` text parts

use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::manifest::FileId;
use crate::state::AppState;
use crate::upload::{StagedUpload, UploadError};

/// Multipart part carrying the file
const VIDEO_FIELD: &str = "video";

/// Text parts recorded as manifest metadata
const METADATA_FIELDS: [&str; 2] = ["title", "description"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub file_id: FileId,
}

/// POST /upload
///
/// The first `video` part that carries a filename is streamed straight into
/// the chunk store. The file only becomes `complete` once the whole form has
/// been read, so a form that breaks after the file part leaves nothing behind.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut staged: Option<StagedUpload> = None;
    let mut trailing = BTreeMap::new();

    if let Err(e) = read_form(&state, &mut multipart, &mut staged, &mut trailing).await {
        if let Some(upload) = staged.take() {
            state.uploads().abort(upload, &e).await;
        }
        return Err(e.into());
    }

    let staged = staged.ok_or(UploadError::NoFileProvided)?;
    let file_id = staged.file_id();

    if !trailing.is_empty() {
        if let Err(e) = state.registry().merge_metadata(file_id, trailing).await {
            tracing::warn!(file_id = %file_id, error = %e, "Could not record trailing metadata");
        }
    }

    let outcome = state.uploads().commit(staged).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded successfully",
            file_id: outcome.file_id,
        }),
    ))
}

/// Consume every part of the form
///
/// Metadata parts seen before the file go into the new manifest, later ones
/// into `trailing`.
async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
    staged: &mut Option<StagedUpload>,
    trailing: &mut BTreeMap<String, String>,
) -> std::result::Result<(), UploadError> {
    let mut metadata = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::StreamFailure(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == VIDEO_FIELD && staged.is_none() {
            // A part without a filename is a plain text field, not a file
            let Some(filename) = field.file_name().map(str::to_string) else {
                continue;
            };

            *staged = Some(state.uploads().stage(&filename, metadata.clone(), field).await?);
        } else if METADATA_FIELDS.contains(&name.as_str()) {
            let value = field
                .text()
                .await
                .map_err(|e| UploadError::StreamFailure(e.to_string()))?;

            if staged.is_some() {
                trailing.insert(name, value);
            } else {
                metadata.insert(name, value);
            }
        }
    }

    Ok(())
}
