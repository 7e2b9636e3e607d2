//! Photosync Core Library
//!
//! This library keeps the photos of a maintenance visit reconciled between
//! the local device, LAN peers and a durable blob store.

pub mod blob;
pub mod config;
pub mod paths;
pub mod peer;
pub mod platform;
pub mod reconcile;
pub mod store;

pub use blob::{BlobStore, FsBlobStore, HttpBlobStore};
pub use config::{BlobBackend, PhotoSyncConfig};
pub use paths::{validate_segment, PhotoKey};
pub use peer::{PeerClient, PeerEndpoint, PeerServer, ServerState};
pub use platform::{default_config_path, default_storage_root, get_data_dir};
pub use reconcile::ReconcileEngine;
pub use store::{ContentHandle, LocalPhotoStore, StoredFile};

use thiserror::Error;

/// Result type for photo sync operations
pub type Result<T> = std::result::Result<T, PhotoSyncError>;

/// General error type for photo sync operations
#[derive(Error, Debug)]
pub enum PhotoSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
