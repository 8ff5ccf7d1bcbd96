//! Upload Coordinator
//!
//! Streams an incoming body into fixed-size chunks, records the manifest,
//! and cleans up after failed or abandoned uploads.

pub mod coordinator;
pub mod reaper;
pub mod types;

pub use coordinator::{StagedUpload, UploadCoordinator};
pub use reaper::{PendingReaper, SweepReport};
pub use types::*;
