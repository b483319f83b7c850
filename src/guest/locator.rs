//! Guest config discovery across cluster nodes

use crate::error::GuestError;
use crate::guest::types::{validate_vmid, GuestId, GuestKind, GuestLocation};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ids found under the nodes tree, split by guest kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GuestInventory {
    pub vm: Vec<GuestId>,
    pub container: Vec<GuestId>,
}

impl GuestInventory {
    pub fn is_empty(&self) -> bool {
        self.vm.is_empty() && self.container.is_empty()
    }

    pub fn contains(&self, id: GuestId) -> bool {
        self.vm.contains(&id) || self.container.contains(&id)
    }
}

/// Resolves guest ids against `<nodes_dir>/<host>/{qemu-server,lxc}/<id>.conf`.
#[derive(Debug, Clone)]
pub struct Locator {
    nodes_dir: PathBuf,
}

impl Locator {
    pub fn new(nodes_dir: impl Into<PathBuf>) -> Self {
        Self {
            nodes_dir: nodes_dir.into(),
        }
    }

    /// Find the host and kind owning `id`.
    pub fn locate(&self, id: GuestId) -> Result<GuestLocation, GuestError> {
        for host in self.hosts()? {
            for kind in GuestKind::all() {
                let path = self
                    .nodes_dir
                    .join(&host)
                    .join(kind.config_subdir())
                    .join(format!("{id}.conf"));
                if path.is_file() {
                    debug!("guest {} found at {}", id, path.display());
                    return Ok(GuestLocation {
                        config_path: path,
                        host,
                        kind,
                    });
                }
            }
        }
        Err(GuestError::NotFound { id })
    }

    /// True when `locate` succeeds.
    pub fn exists(&self, id: GuestId) -> bool {
        self.locate(id).is_ok()
    }

    /// Every guest id on every host. A non-empty `filter` restricts the result to those ids.
    pub fn list_all(&self, filter: &[GuestId]) -> Result<GuestInventory, GuestError> {
        let mut inventory = GuestInventory::default();
        for host in self.hosts()? {
            for kind in GuestKind::all() {
                let dir = self.nodes_dir.join(&host).join(kind.config_subdir());
                for id in config_ids(&dir)? {
                    if !filter.is_empty() && !filter.contains(&id) {
                        continue;
                    }
                    match kind {
                        GuestKind::VirtualMachine => inventory.vm.push(id),
                        GuestKind::Container => inventory.container.push(id),
                    }
                }
            }
        }
        inventory.vm.sort();
        inventory.container.sort();
        Ok(inventory)
    }

    fn hosts(&self) -> Result<Vec<String>, GuestError> {
        if !self.nodes_dir.is_dir() {
            debug!("nodes directory {} is missing", self.nodes_dir.display());
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.nodes_dir).map_err(|source| GuestError::Io {
            path: self.nodes_dir.clone(),
            source,
        })?;
        let mut hosts: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        hosts.sort();
        Ok(hosts)
    }
}

/// Ids of the `<digits>.conf` files in `dir`; a missing dir yields none.
fn config_ids(dir: &Path) -> Result<Vec<GuestId>, GuestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|source| GuestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut ids = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".conf")) else {
            continue;
        };
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Some(id) = validate_vmid(stem) {
            ids.push(id);
        }
    }
    Ok(ids)
}
