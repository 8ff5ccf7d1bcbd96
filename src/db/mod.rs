//! Database module for SQLite persistence
//!
//! Holds the manifest table and, for the default backend, the chunk table.

mod schema;

pub use schema::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Create a new database connection pool
///
/// `synchronous=FULL` so a committed chunk insert survives power loss, which
/// is what the chunk store promises before `put_chunk` returns.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Pool over a throwaway database file; keep the `TempDir` alive while in use
#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let pool = create_pool(&url).await.unwrap();
    (dir, pool)
}
