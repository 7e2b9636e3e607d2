//! Directory-backed durable store, e.g. on a shared mount.

use crate::blob::{split_target, BlobStore};
use crate::paths::PhotoKey;
use crate::store::write_atomic;
use crate::{PhotoSyncError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores `photos/<machine>/<maintenance>/<file>` under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, key: &PhotoKey) -> PathBuf {
        key.durable_fs_path(&self.root)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, local_path: &Path, key: &PhotoKey) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await?;
        let target = self.object_path(key);
        let (dir, name) = split_target(&target)?;
        tokio::fs::create_dir_all(dir).await?;
        write_atomic(dir, name, &bytes).await?;
        Ok(())
    }

    async fn download(&self, key: &PhotoKey, local_path: &Path) -> Result<()> {
        let bytes = match tokio::fs::read(self.object_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PhotoSyncError::NotFound(key.durable_path()))
            }
            Err(e) => return Err(e.into()),
        };
        let (dir, name) = split_target(local_path)?;
        write_atomic(dir, name, &bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &PhotoKey) -> Result<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &PhotoKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }
}
