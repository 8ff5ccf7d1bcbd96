//! Stale upload reaper
//!
//! Background sweep for uploads whose request never finished cleanup
//! (process crash, dropped connection outside a runtime, failed purge).

use std::time::Duration;

use chrono::Utc;

use super::coordinator::purge_upload;
use crate::manifest::{FileStatus, ManifestRegistry, RegistryError};
use crate::storage::SharedChunkStore;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending uploads past the TTL that were failed and purged
    pub expired: usize,
    /// Failed uploads that still had chunks and were purged
    pub purged: usize,
}

/// Periodically fails stale pending uploads and purges orphan chunks
#[derive(Clone)]
pub struct PendingReaper {
    registry: ManifestRegistry,
    store: SharedChunkStore,
    pending_ttl: Duration,
}

impl PendingReaper {
    pub fn new(registry: ManifestRegistry, store: SharedChunkStore, pending_ttl: Duration) -> Self {
        Self {
            registry,
            store,
            pending_ttl,
        }
    }

    /// Run one sweep
    pub async fn sweep(&self) -> Result<SweepReport, RegistryError> {
        let mut report = SweepReport::default();

        let ttl = chrono::Duration::from_std(self.pending_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - ttl;

        for file_id in self.registry.pending_before(cutoff).await? {
            tracing::warn!(file_id = %file_id, "Reaping stale pending upload");
            purge_upload(&self.registry, self.store.as_ref(), file_id).await;
            report.expired += 1;
        }

        for file_id in self.registry.ids_with_status(FileStatus::Failed).await? {
            match self.store.count_chunks(file_id).await {
                Ok(0) => {}
                Ok(_) => {
                    purge_upload(&self.registry, self.store.as_ref(), file_id).await;
                    report.purged += 1;
                }
                Err(e) => {
                    tracing::warn!(file_id = %file_id, error = %e, "Could not inspect chunks of failed upload");
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                purged = report.purged,
                "Upload reaper sweep finished"
            );
        }

        Ok(report)
    }

    /// Start background cleanup task
    pub fn start(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);

            loop {
                interval.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::error!(error = %e, "Upload reaper sweep failed");
                }
            }
        })
    }
}
