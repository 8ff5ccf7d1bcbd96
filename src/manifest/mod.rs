//! File Manifest Registry
//!
//! Tracks identity, size, chunking parameters, metadata and completion
//! state of every stored file.

pub mod registry;
pub mod types;

pub use registry::ManifestRegistry;
pub use types::*;
