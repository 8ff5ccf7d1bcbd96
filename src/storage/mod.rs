//! Chunk Store
//!
//! Durable storage of fixed-size file chunks keyed by `(file_id, sequence)`.
//! Backends:
//! - `sqlite`: chunk rows next to the manifests (default)
//! - `local`: one file per chunk on the local filesystem
//! - `s3`: one object per chunk in an S3-compatible bucket

mod local;
mod s3;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use local::LocalChunkStore;
pub use s3::{S3ChunkStore, S3Client};
pub use sqlite::SqliteChunkStore;

use std::sync::Arc;

use bytes::Bytes;
use sqlx::SqlitePool;

use crate::config::{ChunkBackend, StorageConfig};
use crate::manifest::FileId;

// ============================================================================
// Chunk Store Trait
// ============================================================================

/// Trait for chunk storage backends
///
/// `put_chunk` only returns `Ok` once the chunk is durable. Chunks are never
/// overwritten: a second write of the same `(file_id, sequence)` is rejected.
#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store one chunk
    async fn put_chunk(
        &self,
        file_id: FileId,
        sequence: u64,
        data: Bytes,
    ) -> Result<(), StoreError>;

    /// Read one chunk
    async fn get_chunk(&self, file_id: FileId, sequence: u64) -> Result<Bytes, StoreError>;

    /// Delete every chunk of a file, returning how many were removed.
    /// Deleting a file with no chunks is not an error.
    async fn delete_file(&self, file_id: FileId) -> Result<usize, StoreError>;

    /// Number of chunks currently stored for a file
    async fn count_chunks(&self, file_id: FileId) -> Result<usize, StoreError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Chunk store handle shared across requests
pub type SharedChunkStore = Arc<dyn ChunkStore>;

// ============================================================================
// Error Types
// ============================================================================

/// Chunk store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Chunk storage I/O failure: {0}")]
    IoFailure(String),

    #[error("Chunk {sequence} of {file_id} already exists")]
    DuplicateChunk { file_id: FileId, sequence: u64 },

    #[error("Chunk {sequence} of {file_id} not found")]
    NotFound { file_id: FileId, sequence: u64 },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoFailure(err.to_string())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Open the configured chunk backend
pub async fn open_chunk_store(
    config: &StorageConfig,
    pool: &SqlitePool,
) -> Result<SharedChunkStore, StoreError> {
    let store: SharedChunkStore = match config.backend {
        ChunkBackend::Sqlite => Arc::new(SqliteChunkStore::new(pool.clone())),
        ChunkBackend::Local => Arc::new(LocalChunkStore::open(config.local_dir.clone()).await?),
        ChunkBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StoreError::IoFailure("s3 chunk backend selected without S3 settings".to_string())
            })?;
            let client = S3Client::new(s3).await?;
            Arc::new(S3ChunkStore::new(client, s3.prefix.clone()))
        }
    };

    tracing::info!(backend = store.backend_name(), "Chunk store ready");

    Ok(store)
}
