//! Settings file discovery and loading

use crate::config::schema::Settings;
use crate::error::ConfigError;
use crate::utils::paths::{config_candidates, resolve_under_root};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Read settings from `path`; relative cluster paths resolve against its directory.
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let f = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: Settings = serde_json::from_reader(f).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(root) = path.parent() {
        let paths = &mut settings.paths;
        paths.nodes_dir = resolve_under_root(root, &paths.nodes_dir);
        paths.storage_cfg = resolve_under_root(root, &paths.storage_cfg);
        paths.replication_cfg = resolve_under_root(root, &paths.replication_cfg);
    }
    Ok(settings)
}

/// Load settings from `explicit` (which must exist), else from the first
/// existing default location, else built-in defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        debug!("loading settings from {}", path.display());
        return load_settings_file(path);
    }
    for candidate in config_candidates() {
        if candidate.is_file() {
            debug!("loading settings from {}", candidate.display());
            return load_settings_file(&candidate);
        }
    }
    debug!("no settings file found, using defaults");
    Ok(Settings::default())
}
