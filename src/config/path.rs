//! Locating the single-instance lock file and the default mapping
//! directory under the XDG runtime/data hierarchy.
use std::path::PathBuf;

const FALLBACK_BASE_PATH: &str = "/usr/share/understeer";

/// Returns the base path for shipped default mapping/gear files.
pub fn get_base_path() -> PathBuf {
    let Ok(base_dirs) = xdg::BaseDirectories::with_prefix("understeer") else {
        log::warn!("Unable to determine config base path. Using fallback path.");
        return PathBuf::from(FALLBACK_BASE_PATH);
    };

    for dir in base_dirs.get_data_dirs() {
        if dir.exists() {
            return dir;
        }
    }

    log::warn!("Config base path not found. Using fallback path.");
    PathBuf::from(FALLBACK_BASE_PATH)
}

/// Returns the path to the advisory single-instance lock file, preferring
/// `$XDG_RUNTIME_DIR` so concurrent per-user runs don't collide.
pub fn get_lock_path() -> PathBuf {
    if let Ok(base_dirs) = xdg::BaseDirectories::with_prefix("understeer") {
        if let Ok(path) = base_dirs.place_runtime_file("understeer.lock") {
            return path;
        }
    }
    PathBuf::from("/tmp/understeer.lock")
}
