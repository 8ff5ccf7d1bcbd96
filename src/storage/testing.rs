//! Fault injection for chunk store tests

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use super::{ChunkStore, SharedChunkStore, StoreError};
use crate::manifest::FileId;

/// Wraps a real store and fails writes or reads at a chosen sequence number
pub(crate) struct FaultyChunkStore {
    inner: SharedChunkStore,
    fail_put_at: Option<u64>,
    fail_get_at: Option<u64>,
    puts: AtomicUsize,
}

impl FaultyChunkStore {
    pub(crate) fn new(inner: SharedChunkStore) -> Self {
        Self {
            inner,
            fail_put_at: None,
            fail_get_at: None,
            puts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_put_at(mut self, sequence: u64) -> Self {
        self.fail_put_at = Some(sequence);
        self
    }

    pub(crate) fn failing_get_at(mut self, sequence: u64) -> Self {
        self.fail_get_at = Some(sequence);
        self
    }

    /// Successful writes that reached the inner store
    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChunkStore for FaultyChunkStore {
    async fn put_chunk(
        &self,
        file_id: FileId,
        sequence: u64,
        data: Bytes,
    ) -> Result<(), StoreError> {
        if self.fail_put_at == Some(sequence) {
            return Err(StoreError::IoFailure(format!("injected write failure at {}", sequence)));
        }
        self.inner.put_chunk(file_id, sequence, data).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_chunk(&self, file_id: FileId, sequence: u64) -> Result<Bytes, StoreError> {
        if self.fail_get_at == Some(sequence) {
            return Err(StoreError::IoFailure(format!("injected read failure at {}", sequence)));
        }
        self.inner.get_chunk(file_id, sequence).await
    }

    async fn delete_file(&self, file_id: FileId) -> Result<usize, StoreError> {
        self.inner.delete_file(file_id).await
    }

    async fn count_chunks(&self, file_id: FileId) -> Result<usize, StoreError> {
        self.inner.count_chunks(file_id).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
