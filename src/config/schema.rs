//! Tool settings schema definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// pvetk settings (`config.json`)
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub paths: Paths,
    pub replication: Replication,
    pub remote: Remote,
}

/// Cluster file locations
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub nodes_dir: PathBuf,
    pub storage_cfg: PathBuf,
    pub replication_cfg: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            nodes_dir: PathBuf::from("/etc/pve/nodes"),
            storage_cfg: PathBuf::from("/etc/pve/storage.cfg"),
            replication_cfg: PathBuf::from("/etc/pve/replication.cfg"),
        }
    }
}

/// What to do when replication has not drained in time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Log and carry on with the rename.
    #[default]
    Warn,
    /// Fail before the config file is moved.
    Abort,
}

/// Replication drain behaviour
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Replication {
    pub drain_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub drain_policy: DrainPolicy,
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 90,
            poll_interval_ms: 1000,
            drain_policy: DrainPolicy::Warn,
        }
    }
}

/// Remote execution wrapper
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Remote {
    pub ssh_program: String,
    pub ssh_options: Vec<String>,
}

impl Default for Remote {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}
