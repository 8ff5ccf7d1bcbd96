//! File Manifest Registry
//!
//! SQLite-backed store of file manifests and their lifecycle
//! (`pending` -> `complete` | `failed`).

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::types::{FileId, FileManifest, FileStatus, RegistryError};

/// Row shape of the `files` table
#[derive(Debug, sqlx::FromRow)]
struct ManifestRow {
    id: String,
    filename: String,
    length: i64,
    chunk_size: i64,
    upload_date: String,
    metadata: String,
    status: String,
    sha256: Option<String>,
}

impl TryFrom<ManifestRow> for FileManifest {
    type Error = RegistryError;

    fn try_from(row: ManifestRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .parse()
            .map_err(|_| RegistryError::Corrupt(format!("bad file id '{}'", row.id)))?;
        let upload_date = DateTime::parse_from_rfc3339(&row.upload_date)
            .map_err(|e| RegistryError::Corrupt(format!("bad upload date for {}: {}", row.id, e)))?
            .with_timezone(&Utc);
        let metadata: BTreeMap<String, String> = serde_json::from_str(&row.metadata)
            .map_err(|e| RegistryError::Corrupt(format!("bad metadata for {}: {}", row.id, e)))?;

        Ok(FileManifest {
            id,
            filename: row.filename,
            length: row.length.max(0) as u64,
            chunk_size: row.chunk_size.max(0) as usize,
            upload_date,
            metadata,
            status: row.status.parse()?,
            sha256: row.sha256,
        })
    }
}

/// Timestamps are stored with fixed precision so text order is time order
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const SELECT_MANIFEST: &str = r#"
    SELECT id, filename, length, chunk_size, upload_date, metadata, status, sha256
    FROM files
"#;

/// Registry of file manifests
#[derive(Clone)]
pub struct ManifestRegistry {
    pool: SqlitePool,
}

impl ManifestRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Allocate a new file id with a `pending` manifest
    pub async fn create_manifest(
        &self,
        filename: &str,
        chunk_size: usize,
        metadata: BTreeMap<String, String>,
    ) -> Result<FileId, RegistryError> {
        let id = FileId::new();
        let metadata = serde_json::to_string(&metadata)
            .map_err(|e| RegistryError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO files (id, filename, length, chunk_size, upload_date, metadata, status)
            VALUES (?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(filename)
        .bind(chunk_size as i64)
        .bind(encode_timestamp(Utc::now()))
        .bind(&metadata)
        .bind(FileStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        tracing::debug!(file_id = %id, filename = %filename, chunk_size, "Created manifest");

        Ok(id)
    }

    /// Transition `pending` -> `complete`, recording the final length and digest
    pub async fn mark_complete(
        &self,
        file_id: FileId,
        length: u64,
        sha256: &str,
    ) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r#"
            UPDATE files SET status = ?, length = ?, sha256 = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(FileStatus::Complete.as_str())
        .bind(length as i64)
        .bind(sha256)
        .bind(file_id.to_string())
        .bind(FileStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(file_id, FileStatus::Complete).await);
        }

        Ok(())
    }

    /// Transition `pending` -> `failed`
    pub async fn mark_failed(&self, file_id: FileId) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE files SET status = ? WHERE id = ? AND status = ?")
            .bind(FileStatus::Failed.as_str())
            .bind(file_id.to_string())
            .bind(FileStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(file_id, FileStatus::Failed).await);
        }

        Ok(())
    }

    /// Work out why a conditional status update matched nothing
    async fn transition_error(&self, file_id: FileId, to: FileStatus) -> RegistryError {
        match self.get(file_id).await {
            Ok(manifest) => RegistryError::InvalidTransition {
                file_id,
                from: manifest.status,
                to,
            },
            Err(e) => e,
        }
    }

    /// Fetch one manifest
    pub async fn get(&self, file_id: FileId) -> Result<FileManifest, RegistryError> {
        let row = sqlx::query_as::<_, ManifestRow>(&format!("{} WHERE id = ?", SELECT_MANIFEST))
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RegistryError::NotFound(file_id))?;

        row.try_into()
    }

    /// All manifests, newest upload first, whatever their status
    pub async fn list(&self) -> Result<Vec<FileManifest>, RegistryError> {
        let rows = sqlx::query_as::<_, ManifestRow>(&format!(
            "{} ORDER BY upload_date DESC, rowid DESC",
            SELECT_MANIFEST
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileManifest::try_from).collect()
    }

    /// Add metadata entries to an existing manifest, overwriting equal keys
    pub async fn merge_metadata(
        &self,
        file_id: FileId,
        extra: BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        if extra.is_empty() {
            return Ok(());
        }

        let mut manifest = self.get(file_id).await?;
        manifest.metadata.extend(extra);
        let metadata = serde_json::to_string(&manifest.metadata)
            .map_err(|e| RegistryError::Corrupt(e.to_string()))?;

        sqlx::query("UPDATE files SET metadata = ? WHERE id = ?")
            .bind(&metadata)
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Ids of `pending` manifests created before `cutoff`
    pub async fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<FileId>, RegistryError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM files WHERE status = ? AND upload_date < ? ORDER BY upload_date ASC",
        )
        .bind(FileStatus::Pending.as_str())
        .bind(encode_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        parse_ids(ids)
    }

    /// Ids of every manifest in the given state
    pub async fn ids_with_status(&self, status: FileStatus) -> Result<Vec<FileId>, RegistryError> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM files WHERE status = ?")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        parse_ids(ids)
    }
}

fn parse_ids(rows: Vec<(String,)>) -> Result<Vec<FileId>, RegistryError> {
    rows.into_iter()
        .map(|(id,)| {
            id.parse()
                .map_err(|_| RegistryError::Corrupt(format!("bad file id '{}'", id)))
        })
        .collect()
}
