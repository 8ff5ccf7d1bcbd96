//! VidVault Server Library
//!
//! Video upload, listing and streaming over a chunked object store.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `storage`: Chunk store backends (SQLite, local filesystem, S3)
//! - `manifest`: File manifests and their lifecycle
//! - `upload`: Streaming ingestion and stale upload cleanup
//! - `download`: Ordered, lazy chunk streams
//! - `routes`: HTTP handlers

pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod manifest;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
