//! Disk/volume classification of guest config entries

use crate::error::GuestError;
use crate::guest::config::{ConfigValue, GuestConfig, Scalar};
use serde::Serialize;
use tracing::{debug, info};

/// Config key prefixes (trailing digits stripped) that name storage volumes.
pub const DISK_PREFIXES: &[&str] = &[
    "ide", "sata", "scsi", "virtio", "unused", "mp", "rootfs", "efidisk", "tpmstate", "vmstate",
];

pub const VMSTATE: &str = "vmstate";

/// A storage volume referenced by a guest config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskDescriptor {
    pub interface: String,
    pub storage: String,
    pub volume: String,
    pub raw_value: String,
}

/// Whether `label` names a volume that should follow the guest to its new id.
pub fn is_eligible_volume(label: &str, value: &ConfigValue, exclude_media: bool) -> bool {
    let prefix = label.trim_end_matches(|c: char| c.is_ascii_digit());
    if !DISK_PREFIXES.contains(&prefix) {
        return false;
    }
    if let ConfigValue::Disk(disk) = value {
        let is_cloudinit = disk.raw_values.iter().any(|r| r.contains("cloudinit"));
        if exclude_media && disk.attrs.contains_key("media") && !is_cloudinit {
            return false;
        }
    }
    true
}

/// Split an eligible entry into storage and volume name.
///
/// Returns `Ok(None)` when the entry carries no storage volume (an empty
/// drive, a pass-through device path, or a `vmstate` scalar when
/// `allow_vmstate` is off).
pub fn extract_disk(
    label: &str,
    value: &ConfigValue,
    allow_vmstate: bool,
) -> Result<Option<DiskDescriptor>, GuestError> {
    let raw = match value {
        ConfigValue::Disk(disk) => match disk.raw_values.as_slice() {
            [] => return Ok(None),
            [single] => single.clone(),
            many => {
                return Err(GuestError::MalformedDiskConfig {
                    label: label.to_string(),
                    raw_values: many.to_vec(),
                })
            }
        },
        ConfigValue::Scalar(Scalar::Text(text)) => {
            if label == VMSTATE && !allow_vmstate {
                return Ok(None);
            }
            text.clone()
        }
        ConfigValue::Scalar(Scalar::Int(_)) => return Ok(None),
    };

    let Some((storage, volume)) = raw.split_once(':') else {
        debug!("{} ({}) is not a storage volume, skipping", label, raw);
        return Ok(None);
    };
    if storage.is_empty() || volume.is_empty() || storage.starts_with('/') {
        debug!("{} ({}) is not a storage volume, skipping", label, raw);
        return Ok(None);
    }
    info!("{}: {}", label, raw);
    Ok(Some(DiskDescriptor {
        interface: label.to_string(),
        storage: storage.to_string(),
        volume: volume.to_string(),
        raw_value: raw,
    }))
}

/// Every eligible volume in `config`, in key order.
pub fn collect_disks(
    config: &GuestConfig,
    allow_vmstate: bool,
) -> Result<Vec<DiskDescriptor>, GuestError> {
    let mut disks = Vec::new();
    for (label, value) in config.iter() {
        if !is_eligible_volume(label, value, true) {
            continue;
        }
        if let Some(disk) = extract_disk(label, value, allow_vmstate)? {
            disks.push(disk);
        }
    }
    Ok(disks)
}

/// The memory-state volume saved with a snapshot, if any.
pub fn snapshot_vmstate(config: &GuestConfig) -> Result<Option<DiskDescriptor>, GuestError> {
    match config.get(VMSTATE) {
        Some(value) => extract_disk(VMSTATE, value, true),
        None => Ok(None),
    }
}
