//! S3-compatible chunk backend
//!
//! Works against MinIO, Cloudflare R2, Backblaze B2 and AWS S3. Each chunk is
//! one object at `<prefix>/chunks/<file_id>/<sequence:08>.chunk`.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{Delete, ObjectIdentifier},
    Client,
};
use bytes::Bytes;

use super::{ChunkStore, StoreError};
use crate::config::S3Config;
use crate::manifest::FileId;

/// Most keys a single DeleteObjects request accepts
const MAX_DELETE_BATCH: usize = 1000;

// ============================================================================
// S3 Client
// ============================================================================

/// Thin wrapper around the AWS SDK bound to one bucket
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Result<Self, StoreError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "vidvault",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Upload an object
    pub async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::IoFailure(format!("Failed to put object {}: {}", key, e)))?;

        Ok(())
    }

    /// Get an object's data, `None` if the key does not exist
    pub async fn get_object(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    return Ok(None);
                }
                return Err(StoreError::IoFailure(format!("Failed to get object {}: {}", key, service)));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::IoFailure(format!("Failed to read object body: {}", e)))?
            .into_bytes();

        Ok(Some(data))
    }

    /// Check if an object exists
    pub async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(StoreError::IoFailure(format!("Failed to head object {}: {}", key, service)))
                }
            }
        }
    }

    /// List all keys under a prefix (handles pagination)
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(1000);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StoreError::IoFailure(format!("Failed to list objects: {}", e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }

            continuation_token = response.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete every object under a prefix, returning the count
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.list_keys(prefix).await?;

        for batch in keys.chunks(MAX_DELETE_BATCH) {
            self.delete_batch(batch).await?;
        }

        Ok(keys.len())
    }

    /// One DeleteObjects request; any per-key error fails the batch
    async fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::IoFailure(format!("Invalid delete request: {}", e)))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StoreError::IoFailure(format!("Invalid delete request: {}", e)))?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StoreError::IoFailure(format!("Failed to delete objects: {}", e)))?;

        if let Some(failed) = response.errors().first() {
            return Err(StoreError::IoFailure(format!(
                "Failed to delete object {}: {}",
                failed.key().unwrap_or("?"),
                failed.message().unwrap_or("unknown error")
            )));
        }

        tracing::debug!(count = keys.len(), "Deleted objects");

        Ok(())
    }
}

// ============================================================================
// S3 Chunk Store
// ============================================================================

/// S3-based chunk storage
///
/// Duplicate detection is a HEAD probe before the PUT, so two writers racing
/// on the same key are not caught. Sequence numbers are only ever written by
/// the upload that owns the file id, which keeps that race out of practice.
pub struct S3ChunkStore {
    client: S3Client,
    prefix: String,
}

impl S3ChunkStore {
    pub fn new(client: S3Client, prefix: String) -> Self {
        Self { client, prefix }
    }

    fn file_prefix(&self, file_id: FileId) -> String {
        file_prefix(&self.prefix, file_id)
    }

    fn chunk_key(&self, file_id: FileId, sequence: u64) -> String {
        chunk_key(&self.prefix, file_id, sequence)
    }
}

fn file_prefix(prefix: &str, file_id: FileId) -> String {
    format!("{}/chunks/{}/", prefix.trim_end_matches('/'), file_id)
}

fn chunk_key(prefix: &str, file_id: FileId, sequence: u64) -> String {
    format!("{}{:08}.chunk", file_prefix(prefix, file_id), sequence)
}

#[async_trait::async_trait]
impl ChunkStore for S3ChunkStore {
    async fn put_chunk(
        &self,
        file_id: FileId,
        sequence: u64,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let key = self.chunk_key(file_id, sequence);

        if self.client.object_exists(&key).await? {
            return Err(StoreError::DuplicateChunk { file_id, sequence });
        }

        self.client
            .put_object(&key, data, "application/octet-stream")
            .await
    }

    async fn get_chunk(&self, file_id: FileId, sequence: u64) -> Result<Bytes, StoreError> {
        let key = self.chunk_key(file_id, sequence);

        self.client
            .get_object(&key)
            .await?
            .ok_or(StoreError::NotFound { file_id, sequence })
    }

    async fn delete_file(&self, file_id: FileId) -> Result<usize, StoreError> {
        self.client
            .delete_objects_with_prefix(&self.file_prefix(file_id))
            .await
    }

    async fn count_chunks(&self, file_id: FileId) -> Result<usize, StoreError> {
        let keys = self.client.list_keys(&self.file_prefix(file_id)).await?;
        Ok(keys.iter().filter(|key| key.ends_with(".chunk")).count())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
