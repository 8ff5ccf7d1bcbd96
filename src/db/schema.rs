//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- File manifests (one row per upload attempt)
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    length INTEGER NOT NULL DEFAULT 0,
    chunk_size INTEGER NOT NULL,
    upload_date TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending',
    sha256 TEXT
);

CREATE INDEX IF NOT EXISTS idx_files_upload_date ON files(upload_date);
CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);

-- Chunk payloads for the sqlite chunk backend
CREATE TABLE IF NOT EXISTS chunks (
    file_id TEXT NOT NULL,
    n INTEGER NOT NULL,
    data BLOB NOT NULL,

    PRIMARY KEY (file_id, n)
);
"#;
