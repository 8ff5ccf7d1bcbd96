//! Upload Coordinator
//!
//! Turns an incoming byte stream into a chunked file:
//! 1. Create a `pending` manifest
//! 2. Cut the stream into `chunk_size` windows and write them as chunks 0..n
//! 3. Mark the manifest `complete` with the byte count and SHA-256
//!
//! Any failure marks the manifest `failed` and purges the chunks written so
//! far. A request dropped mid-upload triggers the same cleanup from `Drop`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};

use super::types::{UploadError, UploadOptions, UploadOutcome};
use crate::manifest::{FileId, FileStatus, ManifestRegistry, RegistryError};
use crate::storage::{ChunkStore, SharedChunkStore};

/// Coordinates chunked uploads against a registry and a chunk store
#[derive(Clone)]
pub struct UploadCoordinator {
    registry: ManifestRegistry,
    store: SharedChunkStore,
    options: UploadOptions,
}

impl UploadCoordinator {
    pub fn new(registry: ManifestRegistry, store: SharedChunkStore, options: UploadOptions) -> Self {
        Self {
            registry,
            store,
            options,
        }
    }

    /// Store `stream` as a new file
    pub async fn upload<S, E>(
        &self,
        filename: &str,
        metadata: BTreeMap<String, String>,
        stream: S,
    ) -> Result<UploadOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let staged = self.stage(filename, metadata, stream).await?;
        self.commit(staged).await
    }

    /// Write `stream` as the chunks of a new file, leaving its manifest `pending`.
    ///
    /// The result must be handed to `commit` or `abort`. Dropping it purges the
    /// chunks in the background.
    pub async fn stage<S, E>(
        &self,
        filename: &str,
        metadata: BTreeMap<String, String>,
        stream: S,
    ) -> Result<StagedUpload, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let file_id = self
            .registry
            .create_manifest(filename, self.options.chunk_size, metadata)
            .await
            .map_err(|e| UploadError::WriteFailure(format!("could not create manifest: {}", e)))?;

        let guard = AbortOnDrop::new(file_id, self.registry.clone(), self.store.clone());

        tracing::info!(
            file_id = %file_id,
            filename = %filename,
            chunk_size = self.options.chunk_size,
            "Upload started"
        );

        match self.ingest(file_id, stream).await {
            Ok(outcome) => Ok(StagedUpload { outcome, guard }),
            Err(e) => {
                self.fail(guard, &e).await;
                Err(e)
            }
        }
    }

    /// Mark a staged upload `complete`
    pub async fn commit(&self, staged: StagedUpload) -> Result<UploadOutcome, UploadError> {
        let StagedUpload { outcome, mut guard } = staged;

        if let Err(e) = self
            .registry
            .mark_complete(outcome.file_id, outcome.total_bytes, &outcome.sha256)
            .await
        {
            let err = UploadError::WriteFailure(format!("could not complete manifest: {}", e));
            self.fail(guard, &err).await;
            return Err(err);
        }

        guard.disarm();
        tracing::info!(
            file_id = %outcome.file_id,
            bytes = outcome.total_bytes,
            chunks = outcome.chunk_count,
            "Upload complete"
        );
        Ok(outcome)
    }

    /// Give up on a staged upload: mark it `failed` and purge its chunks
    pub async fn abort(&self, staged: StagedUpload, reason: &UploadError) {
        self.fail(staged.guard, reason).await;
    }

    async fn fail(&self, mut guard: AbortOnDrop, error: &UploadError) {
        let file_id = guard.file_id;
        tracing::error!(file_id = %file_id, error = %error, "Upload failed");
        purge_upload(&self.registry, self.store.as_ref(), file_id).await;
        guard.disarm();
    }

    /// Drain the stream into chunks
    async fn ingest<S, E>(&self, file_id: FileId, stream: S) -> Result<UploadOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        futures::pin_mut!(stream);

        let chunk_size = self.options.chunk_size;
        let mut buffer = BytesMut::with_capacity(chunk_size);
        let mut hasher = Sha256::new();
        let mut sequence: u64 = 0;
        let mut total_bytes: u64 = 0;

        while let Some(piece) = self.next_piece(stream.as_mut()).await? {
            total_bytes += piece.len() as u64;
            hasher.update(&piece);
            buffer.extend_from_slice(&piece);

            while buffer.len() >= chunk_size {
                let chunk = buffer.split_to(chunk_size).freeze();
                self.write_chunk(file_id, sequence, chunk).await?;
                sequence += 1;
            }
        }

        if !buffer.is_empty() {
            self.write_chunk(file_id, sequence, buffer.freeze()).await?;
            sequence += 1;
        }

        Ok(UploadOutcome {
            file_id,
            total_bytes,
            chunk_count: sequence,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    async fn next_piece<S, E>(&self, mut stream: Pin<&mut S>) -> Result<Option<Bytes>, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let next = match self.options.read_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| UploadError::StreamFailure(format!("no data received for {:?}", limit)))?,
            None => stream.next().await,
        };

        match next {
            Some(Ok(piece)) => Ok(Some(piece)),
            Some(Err(e)) => Err(UploadError::StreamFailure(e.to_string())),
            None => Ok(None),
        }
    }

    async fn write_chunk(&self, file_id: FileId, sequence: u64, data: Bytes) -> Result<(), UploadError> {
        let len = data.len();
        let write = self.store.put_chunk(file_id, sequence, data);

        let result = match self.options.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write).await.map_err(|_| {
                UploadError::WriteFailure(format!("chunk {} write timed out after {:?}", sequence, limit))
            })?,
            None => write.await,
        };
        result.map_err(|e| UploadError::WriteFailure(e.to_string()))?;

        tracing::trace!(file_id = %file_id, sequence, bytes = len, "Chunk written");

        Ok(())
    }
}

/// Chunks written for a file whose manifest is still `pending`
pub struct StagedUpload {
    outcome: UploadOutcome,
    guard: AbortOnDrop,
}

impl StagedUpload {
    pub fn file_id(&self) -> FileId {
        self.outcome.file_id
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcome.total_bytes
    }
}

/// Mark an unfinished upload failed and delete its chunks.
///
/// Never touches a file that reached `complete`.
pub(crate) async fn purge_upload(registry: &ManifestRegistry, store: &dyn ChunkStore, file_id: FileId) {
    match registry.mark_failed(file_id).await {
        Ok(()) => {}
        Err(RegistryError::InvalidTransition { from: FileStatus::Failed, .. }) => {}
        Err(RegistryError::InvalidTransition { from, .. }) => {
            tracing::warn!(file_id = %file_id, status = %from, "Refusing to purge chunks of a {} file", from);
            return;
        }
        Err(e) => {
            tracing::warn!(file_id = %file_id, error = %e, "Could not mark upload failed");
        }
    }

    match store.delete_file(file_id).await {
        Ok(count) => {
            tracing::info!(file_id = %file_id, chunks = count, "Purged chunks of failed upload");
        }
        Err(e) => {
            tracing::error!(file_id = %file_id, error = %e, "Failed to purge chunks, leaving them to the reaper");
        }
    }
}

/// Runs the failure cleanup if an upload future is dropped before finishing
struct AbortOnDrop {
    file_id: FileId,
    handles: Option<(ManifestRegistry, SharedChunkStore)>,
}

impl AbortOnDrop {
    fn new(file_id: FileId, registry: ManifestRegistry, store: SharedChunkStore) -> Self {
        Self {
            file_id,
            handles: Some((registry, store)),
        }
    }

    fn disarm(&mut self) {
        self.handles = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some((registry, store)) = self.handles.take() else {
            return;
        };
        let file_id = self.file_id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(file_id = %file_id, "Upload interrupted, cleaning up");
                handle.spawn(async move {
                    purge_upload(&registry, store.as_ref(), file_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(file_id = %file_id, "Upload interrupted outside a runtime, leaving it to the reaper");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
