//! Identifier validation and the durable key scheme.
//!
//! Directory structure mirrored by both the local store and the durable store:
//! ```text
//! <root>/<machine_id>/<maintenance_id>/<file_name>     local
//! photos/<machine_id>/<maintenance_id>/<file_name>     durable
//! ```

use crate::{PhotoSyncError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of every durable object key.
pub const DURABLE_PREFIX: &str = "photos";

/// Suffix of in-progress temp files. Never listed, never served.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Check that `value` is usable as exactly one path segment.
///
/// Rejects empty names, `.`/`..`, path separators and NUL so that joining the
/// segment onto a base directory can never escape it.
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(PhotoSyncError::InvalidInput(format!("{} is empty", kind)));
    }
    if value == "." || value == ".." {
        return Err(PhotoSyncError::InvalidInput(format!(
            "{} must not be a relative directory: {:?}",
            kind, value
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(PhotoSyncError::InvalidInput(format!(
            "{} contains a path separator: {:?}",
            kind, value
        )));
    }
    Ok(())
}

/// Whether `name` looks like an in-progress temp file.
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// Stable identity of one photo asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoKey {
    pub machine_id: String,
    pub maintenance_id: String,
    pub file_name: String,
}

impl PhotoKey {
    /// Build a key, validating all three segments.
    pub fn new(
        machine_id: impl Into<String>,
        maintenance_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            machine_id: machine_id.into(),
            maintenance_id: maintenance_id.into(),
            file_name: file_name.into(),
        };
        validate_segment("machine id", &key.machine_id)?;
        validate_segment("maintenance id", &key.maintenance_id)?;
        validate_segment("file name", &key.file_name)?;
        Ok(key)
    }

    /// `photos/<machine_id>/<maintenance_id>/<file_name>`
    pub fn durable_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            DURABLE_PREFIX, self.machine_id, self.maintenance_id, self.file_name
        )
    }

    /// Same layout joined onto a filesystem root.
    pub fn durable_fs_path(&self, root: &Path) -> PathBuf {
        root.join(DURABLE_PREFIX)
            .join(&self.machine_id)
            .join(&self.maintenance_id)
            .join(&self.file_name)
    }
}

impl fmt::Display for PhotoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.durable_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_path_mirrors_local_layout() {
        let key = PhotoKey::new("m-1", "v-9", "IMG_1.jpg").unwrap();
        assert_eq!(key.durable_path(), "photos/m-1/v-9/IMG_1.jpg");
        assert_eq!(
            key.durable_fs_path(Path::new("/srv/blobs")),
            PathBuf::from("/srv/blobs/photos/m-1/v-9/IMG_1.jpg")
        );
    }

    #[test]
    fn rejects_traversal_segments() {
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b", "nul\0"] {
            assert!(validate_segment("file name", bad).is_err(), "{:?}", bad);
        }
        assert!(validate_segment("file name", "IMG_20240101_101010_000_0.jpg").is_ok());
        assert!(validate_segment("file name", "..hidden").is_ok());
    }

    #[test]
    fn key_construction_validates_every_segment() {
        assert!(PhotoKey::new("..", "v", "f.jpg").is_err());
        assert!(PhotoKey::new("m", "a/b", "f.jpg").is_err());
        assert!(PhotoKey::new("m", "v", "../f.jpg").is_err());
    }

    #[test]
    fn partial_names() {
        assert!(is_partial_name(".IMG_1.jpg.3f2a.partial"));
        assert!(!is_partial_name("IMG_1.jpg"));
        assert!(!is_partial_name("IMG_1.partial"));
    }
}
