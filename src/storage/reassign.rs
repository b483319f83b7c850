//! Moving a single volume to a new guest id

use crate::error::{DiskReassignError, StorageError};
use crate::exec::{HostCommand, Runner, Target};
use crate::guest::types::{validate_vmid, GuestId};
use crate::storage::backend::{StorageBackend, StorageKind};
use crate::storage::conffile::rewrite_volume_reference;
use crate::utils::paths::images_dir;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Old and new names of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRename {
    pub old_id: GuestId,
    pub new_id: GuestId,
    /// Volume carried a `<id>/` directory component (directory storages, containers).
    pub id_prefixed: bool,
    pub old_name: String,
    pub new_name: String,
}

impl VolumeRename {
    /// Derive the new name of `volume` (e.g. `vm-100-disk-0`,
    /// `100/vm-100-disk-0.qcow2`), which must belong to guest `origin`.
    pub fn plan(volume: &str, origin: GuestId, new_id: GuestId) -> Result<Self, StorageError> {
        let malformed = |reason| StorageError::MalformedVolumeName {
            volume: volume.to_string(),
            reason,
        };
        let (prefix, name) = match volume.split_once('/') {
            Some((prefix, name)) => (Some(prefix), name),
            None => (None, volume),
        };
        // `<base id>/<base>/<id>/<volume>` on directory storages
        if name.contains('/') {
            return Err(malformed("linked clone volumes are not supported"));
        }
        let old_id = name
            .split('-')
            .nth(1)
            .and_then(validate_vmid)
            .ok_or_else(|| malformed("expected <type>-<id>-<name>"))?;
        if old_id != origin {
            return Err(malformed("volume belongs to another guest"));
        }
        let id_prefixed = match prefix {
            None => false,
            Some(p) if p == old_id.to_string() => true,
            Some(_) => return Err(malformed("linked clone volumes are not supported")),
        };
        let new_name = name.replace(&format!("-{old_id}-"), &format!("-{new_id}-"));
        Ok(Self {
            old_id,
            new_id,
            id_prefixed,
            old_name: name.to_string(),
            new_name,
        })
    }

    /// Volume reference as written after `storage:` in guest configs.
    pub fn old_reference(&self) -> String {
        self.reference(self.old_id, &self.old_name)
    }

    pub fn new_reference(&self) -> String {
        self.reference(self.new_id, &self.new_name)
    }

    fn reference(&self, id: GuestId, name: &str) -> String {
        if self.id_prefixed {
            format!("{id}/{name}")
        } else {
            name.to_string()
        }
    }
}

/// `<storage>-<volume without its disk suffix>`, the tag used on tagged LVM storages.
pub fn lv_tag(storage: &str, volume: &str) -> String {
    let stem = ["-cloudinit", "-disk-", "-state-"]
        .iter()
        .find_map(|suffix| volume.find(suffix).map(|at| &volume[..at]))
        .unwrap_or(volume);
    format!("{storage}-{stem}")
}

/// Renames volumes within their backend and patches the guest config to match.
pub struct DiskReassigner<'r, 'e> {
    runner: &'r Runner<'e>,
    target: Target,
}

impl<'r, 'e> DiskReassigner<'r, 'e> {
    pub fn new(runner: &'r Runner<'e>, target: Target) -> Self {
        Self { runner, target }
    }

    /// Rename `volume` of guest `origin` on `backend` for `new_id` and update
    /// `new_config_path`.
    pub fn reassign_disk(
        &self,
        backend: &StorageBackend,
        volume: &str,
        origin: GuestId,
        new_id: GuestId,
        new_config_path: &Path,
    ) -> Result<VolumeRename, DiskReassignError> {
        let plan = VolumeRename::plan(volume, origin, new_id)?;
        debug!("resolved storage:\n{}", backend.to_stanza());
        info!(
            "Renaming {} on {} ({}) to {}",
            plan.old_name, backend.name, backend.kind, plan.new_name
        );

        let mut old_images_dir = None;
        let rename = match backend.kind {
            StorageKind::Lvm | StorageKind::LvmThin => HostCommand::new("lvrename").args([
                backend.path.as_str(),
                plan.old_name.as_str(),
                plan.new_name.as_str(),
            ]),
            StorageKind::ZfsPool => HostCommand::new("zfs").args([
                "rename".to_string(),
                format!("{}/{}", backend.path, plan.old_name),
                format!("{}/{}", backend.path, plan.new_name),
            ]),
            StorageKind::Dir | StorageKind::CephFs => {
                let old_dir = images_dir(&backend.path, plan.old_id);
                let new_dir = images_dir(&backend.path, plan.new_id);
                debug!("Ensuring path exists ({})", new_dir);
                self.runner
                    .apply(&HostCommand::new("mkdir").args(["-p", new_dir.as_str()]), &self.target)?;
                let cmd = HostCommand::new("mv").args([
                    format!("{old_dir}/{}", plan.old_name),
                    format!("{new_dir}/{}", plan.new_name),
                ]);
                old_images_dir = Some(old_dir);
                cmd
            }
            StorageKind::Rbd => HostCommand::new("rbd").args([
                "mv".to_string(),
                format!("{}/{}", backend.path, plan.old_name),
                format!("{}/{}", backend.path, plan.new_name),
            ]),
        };
        self.runner.apply(&rename, &self.target)?;

        self.patch_config(&plan, new_config_path)?;

        if matches!(backend.kind, StorageKind::Lvm | StorageKind::LvmThin) && backend.tagged_only() {
            self.move_lv_tag(backend, &plan);
        }
        if let Some(old_dir) = old_images_dir {
            self.remove_empty_dir(&old_dir);
        }
        Ok(plan)
    }

    fn patch_config(&self, plan: &VolumeRename, path: &Path) -> Result<(), DiskReassignError> {
        let (old_ref, new_ref) = (plan.old_reference(), plan.new_reference());
        let description = format!(
            "rewrite {}: :{} -> :{}",
            path.display(),
            old_ref,
            new_ref
        );
        self.runner.apply_local(description, || {
            let replaced = rewrite_volume_reference(path, &old_ref, &new_ref).map_err(|source| {
                DiskReassignError::ConfigPatch {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            if replaced == 0 {
                warn!("{} does not reference {}", path.display(), old_ref);
            }
            Ok(())
        })
    }

    /// Best effort: a stale tag only affects tagged_only listing.
    fn move_lv_tag(&self, backend: &StorageBackend, plan: &VolumeRename) {
        let cmd = HostCommand::new("lvchange").args([
            "--deltag".to_string(),
            lv_tag(&backend.name, &plan.old_name),
            "--add-tag".to_string(),
            lv_tag(&backend.name, &plan.new_name),
            format!("{}/{}", backend.path, plan.new_name),
        ]);
        if let Err(e) = self.runner.apply(&cmd, &self.target) {
            error!("Could not change LV tags, check them after completion: {}", e);
        }
    }

    fn remove_empty_dir(&self, dir: &str) {
        debug!("Attempting to remove {}", dir);
        if let Err(e) = self
            .runner
            .apply(&HostCommand::new("rmdir").arg(dir), &self.target)
        {
            warn!("Could not delete prior guest images path ({}): {}", dir, e);
        }
    }
}
