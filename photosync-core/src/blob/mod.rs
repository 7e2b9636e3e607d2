//! Durable blob store consumed by the reconciliation engine.

pub mod fs;
pub mod http;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

use crate::config::BlobBackend;
use crate::paths::PhotoKey;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Always-reachable object store holding backstop copies of photos.
///
/// Every call blocks the calling task until the operation finished or failed.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy `local_path` to `key`.
    async fn upload(&self, local_path: &Path, key: &PhotoKey) -> Result<()>;

    /// Copy `key` to `local_path`, whole file or nothing. A missing key is `NotFound`.
    async fn download(&self, key: &PhotoKey, local_path: &Path) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &PhotoKey) -> Result<()>;

    /// Whether `key` currently holds a durable copy.
    async fn exists(&self, key: &PhotoKey) -> Result<bool>;
}

/// Build the configured backend.
pub fn from_backend(backend: &BlobBackend, timeout: Duration) -> Result<Arc<dyn BlobStore>> {
    Ok(match backend {
        BlobBackend::Filesystem { root } => Arc::new(FsBlobStore::new(root.clone())),
        BlobBackend::Http {
            base_url,
            bearer_token,
        } => Arc::new(HttpBlobStore::new(base_url, bearer_token.clone(), timeout)?),
    })
}

/// Split `local_path` into its directory and file name for an atomic write.
pub(crate) fn split_target(local_path: &Path) -> Result<(&Path, &str)> {
    let dir = local_path.parent().unwrap_or_else(|| Path::new("."));
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            crate::PhotoSyncError::InvalidInput(format!("{:?} has no file name", local_path))
        })?;
    Ok((dir, name))
}
