//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::download::DownloadCoordinator;
use crate::manifest::ManifestRegistry;
use crate::storage::{self, SharedChunkStore, StoreError};
use crate::upload::{PendingReaper, UploadCoordinator, UploadOptions};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to open database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to open chunk store: {0}")]
    ChunkStore(#[from] StoreError),
}

/// Shared application state
///
/// Built once at startup and cloned into every request.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    registry: ManifestRegistry,
    store: SharedChunkStore,
    uploads: UploadCoordinator,
    downloads: DownloadCoordinator,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Open the database and chunk backend named by `config`
    pub async fn new(config: Config) -> Result<Self, StateError> {
        let db = crate::db::create_pool(&config.database.url).await?;
        let store = storage::open_chunk_store(&config.storage, &db).await?;
        Ok(Self::from_parts(config, db, store))
    }

    /// Assemble state from already opened resources
    pub fn from_parts(config: Config, db: SqlitePool, store: SharedChunkStore) -> Self {
        let registry = ManifestRegistry::new(db.clone());

        let uploads = UploadCoordinator::new(
            registry.clone(),
            store.clone(),
            UploadOptions {
                chunk_size: config.upload.chunk_size,
                read_timeout: config.upload.read_timeout,
                write_timeout: config.upload.io_timeout,
            },
        );
        let downloads = DownloadCoordinator::new(registry.clone(), store.clone(), config.upload.io_timeout);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                registry,
                store,
                uploads,
                downloads,
                reaper: Mutex::new(None),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the manifest registry
    pub fn registry(&self) -> &ManifestRegistry {
        &self.inner.registry
    }

    /// Get the chunk store
    pub fn store(&self) -> &SharedChunkStore {
        &self.inner.store
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.inner.uploads
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.inner.downloads
    }

    /// Start the stale upload reaper (no-op if already running)
    pub async fn start_reaper(&self) {
        let mut slot = self.inner.reaper.lock().await;
        if slot.is_some() {
            return;
        }

        let upload = &self.inner.config.upload;
        let reaper = PendingReaper::new(
            self.inner.registry.clone(),
            self.inner.store.clone(),
            upload.pending_ttl,
        );
        *slot = Some(reaper.start(upload.reaper_interval));

        tracing::info!(
            ttl_secs = upload.pending_ttl.as_secs(),
            interval_secs = upload.reaper_interval.as_secs(),
            "Upload reaper started"
        );
    }

    /// Stop background work and close the database
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");

        if let Some(handle) = self.inner.reaper.lock().await.take() {
            handle.abort();
        }

        self.inner.db.close().await;
    }
}
