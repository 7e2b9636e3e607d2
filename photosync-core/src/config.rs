//! Photosync configuration.

use crate::peer::client::DEFAULT_MAX_PHOTO_BYTES;
use crate::platform::default_storage_root;
use crate::{PhotoSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which durable store backend to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlobBackend {
    /// Directory on a shared mount.
    Filesystem { root: PathBuf },
    /// Object storage reachable over HTTP (PUT/GET/DELETE/HEAD on `{base_url}/{key}`).
    Http {
        base_url: String,
        #[serde(default)]
        bearer_token: Option<String>,
    },
}

impl Default for BlobBackend {
    fn default() -> Self {
        Self::Filesystem {
            root: crate::platform::get_data_dir().join("durable"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoSyncConfig {
    pub storage_root: PathBuf,
    pub peer_listen_addr: String,
    /// Directory served to peers. Falls back to `storage_root`.
    pub peer_base_dir: Option<PathBuf>,
    pub peer_timeout_secs: u64,
    pub blob_timeout_secs: u64,
    pub transfer_concurrency: usize,
    /// Peer responses larger than this are refused.
    pub max_photo_bytes: u64,
    pub blob: BlobBackend,
}

impl Default for PhotoSyncConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            peer_listen_addr: "0.0.0.0:8080".to_string(),
            peer_base_dir: None,
            peer_timeout_secs: 10,
            blob_timeout_secs: 60,
            transfer_concurrency: 4,
            max_photo_bytes: DEFAULT_MAX_PHOTO_BYTES,
            blob: BlobBackend::default(),
        }
    }
}

impl PhotoSyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PhotoSyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer_concurrency == 0 {
            return Err(PhotoSyncError::Config(
                "transfer_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_photo_bytes == 0 {
            return Err(PhotoSyncError::Config(
                "max_photo_bytes must be at least 1".to_string(),
            ));
        }
        if self.peer_timeout_secs == 0 || self.blob_timeout_secs == 0 {
            return Err(PhotoSyncError::Config(
                "timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn peer_base_dir(&self) -> &Path {
        self.peer_base_dir.as_deref().unwrap_or(&self.storage_root)
    }
}
