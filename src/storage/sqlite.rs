//! SQLite chunk backend
//!
//! Chunks live as BLOB rows in the `chunks` table; the composite primary key
//! enforces one row per `(file_id, n)`.

use bytes::Bytes;
use sqlx::SqlitePool;

use super::{ChunkStore, StoreError};
use crate::manifest::FileId;

/// Chunk storage in the application database
#[derive(Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn put_chunk(
        &self,
        file_id: FileId,
        sequence: u64,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO chunks (file_id, n, data) VALUES (?, ?, ?)")
            .bind(file_id.to_string())
            .bind(sequence as i64)
            .bind(data.as_ref())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateChunk { file_id, sequence })
            }
            Err(e) => Err(StoreError::IoFailure(e.to_string())),
        }
    }

    async fn get_chunk(&self, file_id: FileId, sequence: u64) -> Result<Bytes, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM chunks WHERE file_id = ? AND n = ?")
                .bind(file_id.to_string())
                .bind(sequence as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::IoFailure(e.to_string()))?;

        row.map(|(data,)| Bytes::from(data))
            .ok_or(StoreError::NotFound { file_id, sequence })
    }

    async fn delete_file(&self, file_id: FileId) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::IoFailure(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn count_chunks(&self, file_id: FileId) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::IoFailure(e.to_string()))?;

        Ok(count as usize)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, pool) = test_pool().await;
        let store = SqliteChunkStore::new(pool);
        let file_id = FileId::new();

        store.put_chunk(file_id, 0, Bytes::from_static(b"hello ")).await.unwrap();
        store.put_chunk(file_id, 1, Bytes::from_static(b"world")).await.unwrap();

        assert_eq!(store.get_chunk(file_id, 1).await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(store.count_chunks(file_id).await.unwrap(), 2);

        assert_eq!(store.delete_file(file_id).await.unwrap(), 2);
        assert_eq!(store.count_chunks(file_id).await.unwrap(), 0);
        // Idempotent
        assert_eq!(store.delete_file(file_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_rejected() {
        let (_dir, pool) = test_pool().await;
        let store = SqliteChunkStore::new(pool);
        let file_id = FileId::new();

        store.put_chunk(file_id, 0, Bytes::from_static(b"a")).await.unwrap();
        let err = store.put_chunk(file_id, 0, Bytes::from_static(b"b")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateChunk { sequence: 0, .. }));

        // Original chunk untouched
        assert_eq!(store.get_chunk(file_id, 0).await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_missing_chunk() {
        let (_dir, pool) = test_pool().await;
        let store = SqliteChunkStore::new(pool);

        let err = store.get_chunk(FileId::new(), 3).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { sequence: 3, .. }));
    }

    #[tokio::test]
    async fn test_files_are_isolated() {
        let (_dir, pool) = test_pool().await;
        let store = SqliteChunkStore::new(pool);
        let a = FileId::new();
        let b = FileId::new();

        store.put_chunk(a, 0, Bytes::from_static(b"a0")).await.unwrap();
        store.put_chunk(b, 0, Bytes::from_static(b"b0")).await.unwrap();
        store.delete_file(a).await.unwrap();

        assert_eq!(store.count_chunks(a).await.unwrap(), 0);
        assert_eq!(store.get_chunk(b, 0).await.unwrap(), Bytes::from_static(b"b0"));
    }
}
