//! Where photosync keeps photos and its config when nothing is configured.

use std::path::PathBuf;

/// Per-user directory holding visit photos and the filesystem durable store,
/// e.g. `~/.local/share/photosync` on Linux. Without a platform data dir it is
/// `~/.photosync`, and `./.photosync` when there is no home either.
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("photosync"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".photosync")))
        .unwrap_or_else(|| PathBuf::from(".photosync"))
}

/// Directory searched for `photosync.toml`; shares the data dir where the
/// platform has no config dir.
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("photosync"))
        .unwrap_or_else(get_data_dir)
}

/// Root of the per-visit photo directories
pub fn default_storage_root() -> PathBuf {
    get_data_dir().join("photos")
}

/// Default location of `photosync.toml`
pub fn default_config_path() -> PathBuf {
    get_config_dir().join("photosync.toml")
}
