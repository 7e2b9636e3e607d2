//! Local photo store: one flat directory per maintenance visit.

use crate::paths::{is_partial_name, validate_segment, PARTIAL_SUFFIX};
use crate::{PhotoSyncError, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extension given to every captured photo.
pub const PHOTO_EXTENSION: &str = "jpg";

/// Where the bytes of an incoming capture come from.
#[derive(Debug, Clone)]
pub enum ContentHandle {
    /// A file produced by the camera or picker.
    Path(PathBuf),
    /// Bytes already in memory.
    Bytes(Vec<u8>),
}

impl ContentHandle {
    async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => tokio::fs::read(path).await,
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// A photo that landed in a visit directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Maps `(machine_id, maintenance_id)` onto `<root>/<machine_id>/<maintenance_id>`.
#[derive(Debug, Clone)]
pub struct LocalPhotoStore {
    root: PathBuf,
}

impl LocalPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a visit directory without touching the filesystem.
    pub fn visit_dir(&self, machine_id: &str, maintenance_id: &str) -> Result<PathBuf> {
        validate_segment("machine id", machine_id)?;
        validate_segment("maintenance id", maintenance_id)?;
        Ok(self.root.join(machine_id).join(maintenance_id))
    }

    /// Visit directory, created if absent. Same inputs always give the same path.
    pub async fn resolve_directory(&self, machine_id: &str, maintenance_id: &str) -> Result<PathBuf> {
        let dir = self.visit_dir(machine_id, maintenance_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve a stored relative folder such as `"<machine>/<maintenance>"`.
    pub fn directory_from_relative(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative);
        let mut components = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => components += 1,
                Component::CurDir => {}
                _ => {
                    return Err(PhotoSyncError::InvalidInput(format!(
                        "relative photo folder escapes the storage root: {:?}",
                        relative
                    )))
                }
            }
        }
        if components == 0 {
            return Err(PhotoSyncError::InvalidInput(
                "relative photo folder is empty".to_string(),
            ));
        }
        Ok(self.root.join(relative))
    }

    /// Copy a batch of captures into the visit directory.
    ///
    /// Items are named `IMG_<timestamp>_<index>.jpg` and returned in input
    /// order. A failing item is logged and skipped; it shows up later as a gap.
    /// Only failure to create the directory is returned.
    pub async fn save_incoming_files(
        &self,
        sources: &[ContentHandle],
        machine_id: &str,
        maintenance_id: &str,
    ) -> Result<Vec<StoredFile>> {
        let dir = self.resolve_directory(machine_id, maintenance_id).await?;
        let mut stored = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            let stem = format!("IMG_{}_{}", capture_timestamp(Local::now()), index);
            match save_one(&dir, &stem, source).await {
                Ok(file) => stored.push(file),
                Err(e) => warn!(
                    "Failed to store capture #{} for {}/{}: {}",
                    index, machine_id, maintenance_id, e
                ),
            }
        }

        Ok(stored)
    }

    /// Copy a single capture into the visit directory as `IMG_<timestamp>.jpg`.
    pub async fn save_incoming_file(
        &self,
        source: &ContentHandle,
        machine_id: &str,
        maintenance_id: &str,
    ) -> Result<StoredFile> {
        let dir = self.resolve_directory(machine_id, maintenance_id).await?;
        let stem = format!("IMG_{}", capture_timestamp(Local::now()));
        save_one(&dir, &stem, source).await
    }

    /// Whether every expected name is present for the visit.
    pub async fn is_complete(
        &self,
        machine_id: &str,
        maintenance_id: &str,
        expected: &BTreeSet<String>,
    ) -> Result<bool> {
        let dir = self.visit_dir(machine_id, maintenance_id)?;
        Ok(compute_missing(expected, &dir).await?.is_empty())
    }
}

/// `yyyyMMdd_HHmmss_SSS`
pub fn capture_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S_%3f").to_string()
}

async fn save_one(dir: &Path, stem: &str, source: &ContentHandle) -> Result<StoredFile> {
    let bytes = source.read().await?;
    let (file_name, path) = write_unique(dir, stem, &bytes).await?;
    Ok(StoredFile {
        file_name,
        path,
        size: bytes.len() as u64,
    })
}

/// Store `bytes` under the first free name among `<stem>.jpg`, `<stem>_1.jpg`, ...
///
/// The name is claimed by hard-linking a fully written temp file, which fails
/// on an existing target. Concurrent captures therefore never share a name and
/// readers never see a partial photo.
async fn write_unique(dir: &Path, stem: &str, bytes: &[u8]) -> Result<(String, PathBuf)> {
    validate_segment("file name stem", stem)?;
    let temp = write_temp(dir, stem, bytes).await?;

    let mut candidate = format!("{}.{}", stem, PHOTO_EXTENSION);
    let mut suffix = 1u32;
    let claimed: Result<(String, PathBuf)> = loop {
        let target = dir.join(&candidate);
        match tokio::fs::hard_link(&temp, &target).await {
            Ok(()) => break Ok((candidate, target)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = format!("{}_{}.{}", stem, suffix, PHOTO_EXTENSION);
                suffix += 1;
            }
            Err(e) => break Err(e.into()),
        }
    };

    remove_temp(&temp).await;
    claimed
}

/// Write `bytes` to `dir/file_name` so that readers see either nothing or the
/// whole file.
///
/// Bytes go to a hidden `.partial` sibling first and are renamed onto the
/// target once flushed. A leftover `.partial` (from a dropped future) is
/// never listed or served.
pub async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    validate_segment("file name", file_name)?;
    let target = dir.join(file_name);
    let temp = write_temp(dir, file_name, bytes).await?;

    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        remove_temp(&temp).await;
        return Err(e.into());
    }

    Ok(target)
}

/// Flush `bytes` into a fresh hidden `.partial` file in `dir`.
async fn write_temp(dir: &Path, label: &str, bytes: &[u8]) -> Result<PathBuf> {
    let temp = dir.join(format!(
        ".{}.{}{}",
        label,
        Uuid::new_v4().simple(),
        PARTIAL_SUFFIX
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = result {
        remove_temp(&temp).await;
        return Err(e.into());
    }
    Ok(temp)
}

async fn remove_temp(temp: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp).await {
        if e.kind() != ErrorKind::NotFound {
            debug!("Could not remove temp file {:?}: {}", temp, e);
        }
    }
}

/// Names of the complete photos in `dir`, in lexicographic order.
///
/// A directory that does not exist holds zero files.
pub async fn list_files(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_partial_name(&name) {
            continue;
        }
        names.insert(name);
    }

    Ok(names)
}

/// `expected \ list_files(dir)`
pub async fn compute_missing(expected: &BTreeSet<String>, dir: &Path) -> Result<BTreeSet<String>> {
    let present = list_files(dir).await?;
    Ok(expected.difference(&present).cloned().collect())
}
