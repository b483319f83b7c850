//! Path utility functions

use std::path::{Path, PathBuf};

/// System-wide settings file.
pub const SYSTEM_CONFIG: &str = "/etc/pvetk/config.json";

/// Candidate settings files in lookup order.
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("pvetk").join("config.json"));
    }
    candidates
}

/// Resolve `p` against `root` unless it is already absolute.
pub fn resolve_under_root(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Directory holding a guest's images on a directory-style storage.
pub fn images_dir(storage_path: &str, guest: impl std::fmt::Display) -> String {
    format!("{}/images/{}", storage_path.trim_end_matches('/'), guest)
}
