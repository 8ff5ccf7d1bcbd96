//! Download Coordinator
//!
//! Resolves a file id to its manifest and yields the chunks in order as a
//! lazy stream. Each chunk is fetched only when the consumer polls for it,
//! so a slow client holds at most one chunk in memory.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::manifest::{FileId, FileManifest, ManifestRegistry, RegistryError};
use crate::storage::SharedChunkStore;

// ============================================================================
// Error Types
// ============================================================================

/// Download error types
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Unknown id, or a file that is not `complete`
    #[error("File not available: {0}")]
    NotAvailable(String),

    /// A chunk could not be produced after streaming started
    #[error("Stream of {file_id} failed at chunk {sequence}: {reason}")]
    PartialStreamFailure {
        file_id: FileId,
        sequence: u64,
        reason: String,
    },
}

impl DownloadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotAvailable(_) => StatusCode::NOT_FOUND,
            Self::PartialStreamFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Ordered chunk bytes of one file; ends early with an error on failure
pub type ChunkStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// An opened file ready to stream
pub struct Download {
    pub manifest: FileManifest,
    pub chunks: ChunkStream,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Streams stored files back out of the chunk store
#[derive(Clone)]
pub struct DownloadCoordinator {
    registry: ManifestRegistry,
    store: SharedChunkStore,
    read_timeout: Option<Duration>,
}

/// Cursor carried between chunk fetches
struct Cursor {
    store: SharedChunkStore,
    manifest: FileManifest,
    next: u64,
    read_timeout: Option<Duration>,
}

impl DownloadCoordinator {
    pub fn new(registry: ManifestRegistry, store: SharedChunkStore, read_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            store,
            read_timeout,
        }
    }

    /// Open a complete file for streaming
    ///
    /// Unknown ids and files that are still pending or have failed are all
    /// reported as `NotAvailable`; no bytes are produced for them.
    pub async fn open(&self, file_id: FileId) -> Result<Download, DownloadError> {
        let manifest = match self.registry.get(file_id).await {
            Ok(manifest) => manifest,
            Err(RegistryError::NotFound(_)) => {
                return Err(DownloadError::NotAvailable(format!("no file {}", file_id)));
            }
            Err(e) => {
                tracing::error!(file_id = %file_id, error = %e, "Manifest lookup failed");
                return Err(DownloadError::NotAvailable(format!("lookup of {} failed", file_id)));
            }
        };

        if !manifest.is_complete() {
            return Err(DownloadError::NotAvailable(format!(
                "file {} is {}",
                file_id, manifest.status
            )));
        }

        tracing::debug!(
            file_id = %file_id,
            bytes = manifest.length,
            chunks = manifest.chunk_count(),
            "Opening download"
        );

        let cursor = Cursor {
            store: self.store.clone(),
            manifest: manifest.clone(),
            next: 0,
            read_timeout: self.read_timeout,
        };

        let chunks = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.next >= cursor.manifest.chunk_count() {
                return Ok(None);
            }
            let chunk = cursor.fetch().await?;
            cursor.next += 1;
            Ok(Some((chunk, cursor)))
        })
        .boxed();

        Ok(Download { manifest, chunks })
    }
}

impl Cursor {
    async fn fetch(&self) -> Result<Bytes, DownloadError> {
        let file_id = self.manifest.id;
        let sequence = self.next;
        let failure = |reason: String| DownloadError::PartialStreamFailure {
            file_id,
            sequence,
            reason,
        };

        let read = self.store.get_chunk(file_id, sequence);
        let chunk = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| failure(format!("read timed out after {:?}", limit)))?,
            None => read.await,
        }
        .map_err(|e| failure(e.to_string()))?;

        let expected = self.manifest.chunk_len(sequence);
        if chunk.len() != expected {
            return Err(failure(format!(
                "chunk holds {} bytes, expected {}",
                chunk.len(),
                expected
            )));
        }

        Ok(chunk)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use futures::TryStreamExt;

    use crate::db::test_pool;
    use crate::storage::testing::FaultyChunkStore;
    use crate::storage::{ChunkStore, SqliteChunkStore};
    use crate::upload::{UploadCoordinator, UploadOptions};

    const CHUNK: usize = 16;

    fn single(data: Vec<u8>) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(vec![Ok(Bytes::from(data))])
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    async fn coordinators(
        store: SharedChunkStore,
        registry: ManifestRegistry,
    ) -> (UploadCoordinator, DownloadCoordinator) {
        let options = UploadOptions {
            chunk_size: CHUNK,
            ..UploadOptions::default()
        };
        (
            UploadCoordinator::new(registry.clone(), store.clone(), options),
            DownloadCoordinator::new(registry, store, None),
        )
    }

    #[tokio::test]
    async fn test_round_trip_identity() {
        let (_dir, pool) = test_pool().await;
        let store: SharedChunkStore = Arc::new(SqliteChunkStore::new(pool.clone()));
        let (uploads, downloads) = coordinators(store.clone(), ManifestRegistry::new(pool)).await;

        for len in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1, 10 * CHUNK] {
            let data = sample(len);
            let outcome = uploads.upload("v.mp4", BTreeMap::new(), single(data.clone())).await.unwrap();

            let download = downloads.open(outcome.file_id).await.unwrap();
            assert_eq!(download.manifest.chunk_count(), len.div_ceil(CHUNK) as u64);
            assert_eq!(
                store.count_chunks(outcome.file_id).await.unwrap() as u64,
                download.manifest.chunk_count()
            );

            let chunks: Vec<Bytes> = download.chunks.try_collect().await.unwrap();
            assert_eq!(chunks.concat(), data, "round trip of {} bytes", len);
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_available() {
        let (_dir, pool) = test_pool().await;
        let store: SharedChunkStore = Arc::new(SqliteChunkStore::new(pool.clone()));
        let (_, downloads) = coordinators(store, ManifestRegistry::new(pool)).await;

        let result = downloads.open(FileId::new()).await;
        assert!(matches!(result, Err(DownloadError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn test_pending_and_failed_are_not_available() {
        let (_dir, pool) = test_pool().await;
        let registry = ManifestRegistry::new(pool.clone());
        let store: SharedChunkStore = Arc::new(SqliteChunkStore::new(pool));
        let (_, downloads) = coordinators(store.clone(), registry.clone()).await;

        let pending = registry.create_manifest("p.mp4", CHUNK, BTreeMap::new()).await.unwrap();
        store.put_chunk(pending, 0, Bytes::from(sample(CHUNK))).await.unwrap();
        assert!(matches!(downloads.open(pending).await, Err(DownloadError::NotAvailable(_))));

        let failed = registry.create_manifest("f.mp4", CHUNK, BTreeMap::new()).await.unwrap();
        registry.mark_failed(failed).await.unwrap();
        assert!(matches!(downloads.open(failed).await, Err(DownloadError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_ends_stream() {
        let (_dir, pool) = test_pool().await;
        let registry = ManifestRegistry::new(pool.clone());
        let inner: SharedChunkStore = Arc::new(SqliteChunkStore::new(pool));
        let (uploads, _) = coordinators(inner.clone(), registry.clone()).await;

        let data = sample(5 * CHUNK);
        let outcome = uploads.upload("v.mp4", BTreeMap::new(), single(data.clone())).await.unwrap();

        let faulty: SharedChunkStore = Arc::new(FaultyChunkStore::new(inner).failing_get_at(2));
        let downloads = DownloadCoordinator::new(registry, faulty, None);
        let mut chunks = downloads.open(outcome.file_id).await.unwrap().chunks;

        assert_eq!(chunks.next().await.unwrap().unwrap(), &data[..CHUNK]);
        assert_eq!(chunks.next().await.unwrap().unwrap(), &data[CHUNK..2 * CHUNK]);
        match chunks.next().await {
            Some(Err(DownloadError::PartialStreamFailure { sequence, .. })) => assert_eq!(sequence, 2),
            other => panic!("expected partial failure, got {:?}", other.map(|r| r.map(|b| b.len()))),
        }
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_chunk_is_detected() {
        let (_dir, pool) = test_pool().await;
        let registry = ManifestRegistry::new(pool.clone());
        let store: SharedChunkStore = Arc::new(SqliteChunkStore::new(pool));
        let (_, downloads) = coordinators(store.clone(), registry.clone()).await;

        // Manifest claims two full chunks, the second is short
        let file_id = registry.create_manifest("t.mp4", CHUNK, BTreeMap::new()).await.unwrap();
        store.put_chunk(file_id, 0, Bytes::from(sample(CHUNK))).await.unwrap();
        store.put_chunk(file_id, 1, Bytes::from(sample(3))).await.unwrap();
        registry.mark_complete(file_id, 2 * CHUNK as u64, "x").await.unwrap();

        let result: Result<Vec<Bytes>, _> = downloads.open(file_id).await.unwrap().chunks.try_collect().await;
        assert!(matches!(
            result,
            Err(DownloadError::PartialStreamFailure { sequence: 1, .. })
        ));
    }
}
