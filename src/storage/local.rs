//! Local filesystem chunk backend

use std::io::ErrorKind;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{ChunkStore, StoreError};
use crate::manifest::FileId;

/// Local filesystem chunk storage
///
/// Layout: `<base>/chunks/<file_id>/<sequence:08>.chunk`
pub struct LocalChunkStore {
    base_path: PathBuf,
}

impl LocalChunkStore {
    /// Open (and create if needed) the chunk directory
    pub async fn open(base_path: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(base_path.join("chunks")).await?;
        Ok(Self { base_path })
    }

    fn file_dir(&self, file_id: FileId) -> PathBuf {
        self.base_path.join("chunks").join(file_id.to_string())
    }

    fn chunk_path(&self, file_id: FileId, sequence: u64) -> PathBuf {
        self.file_dir(file_id).join(format!("{:08}.chunk", sequence))
    }
}

#[async_trait::async_trait]
impl ChunkStore for LocalChunkStore {
    async fn put_chunk(
        &self,
        file_id: FileId,
        sequence: u64,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let path = self.chunk_path(file_id, sequence);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::DuplicateChunk { file_id, sequence });
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            // Never leave a torn chunk behind
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get_chunk(&self, file_id: FileId, sequence: u64) -> Result<Bytes, StoreError> {
        match tokio::fs::read(self.chunk_path(file_id, sequence)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound { file_id, sequence })
            }
            Err(e) => Err(StoreError::IoFailure(format!("Failed to read chunk: {}", e))),
        }
    }

    async fn delete_file(&self, file_id: FileId) -> Result<usize, StoreError> {
        let dir = self.file_dir(file_id);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            tokio::fs::remove_file(entry.path()).await?;
            count += 1;
        }

        // Remove empty directory
        let _ = tokio::fs::remove_dir(&dir).await;

        Ok(count)
    }

    async fn count_chunks(&self, file_id: FileId) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.file_dir(file_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "chunk") {
                count += 1;
            }
        }

        Ok(count)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
