//! Guest identifiers and locations

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lowest id the hypervisor hands out to guests.
pub const MIN_GUEST_ID: u32 = 100;
/// First id past the nine-digit range.
pub const MAX_GUEST_ID_EXCLUSIVE: u32 = 999_999_999;

/// Cluster-wide numeric guest identifier (VMID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GuestId(u32);

impl GuestId {
    /// Build an id, returning `None` outside `100..999_999_999`.
    pub fn new(raw: u32) -> Option<Self> {
        (MIN_GUEST_ID..MAX_GUEST_ID_EXCLUSIVE)
            .contains(&raw)
            .then_some(GuestId(raw))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GuestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_vmid(s).ok_or_else(|| {
            format!("'{s}' is not a valid guest id (integer, {MIN_GUEST_ID}-{})", MAX_GUEST_ID_EXCLUSIVE - 1)
        })
    }
}

/// Parse and range-check a user supplied guest id.
pub fn validate_vmid(input: &str) -> Option<GuestId> {
    let digits = input.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().and_then(GuestId::new)
}

/// Whether a guest is a QEMU virtual machine or an LXC container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    VirtualMachine,
    Container,
}

impl GuestKind {
    /// Per-node config subdirectory holding this kind of guest.
    pub fn config_subdir(self) -> &'static str {
        match self {
            GuestKind::VirtualMachine => "qemu-server",
            GuestKind::Container => "lxc",
        }
    }

    /// Management command for this kind of guest.
    pub fn command(self) -> &'static str {
        match self {
            GuestKind::VirtualMachine => "qm",
            GuestKind::Container => "pct",
        }
    }

    pub fn all() -> [GuestKind; 2] {
        [GuestKind::VirtualMachine, GuestKind::Container]
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::VirtualMachine => write!(f, "vm"),
            GuestKind::Container => write!(f, "ct"),
        }
    }
}

/// Where a guest's configuration file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestLocation {
    pub config_path: PathBuf,
    pub host: String,
    pub kind: GuestKind,
}

impl GuestLocation {
    /// Config path the guest will have after its id changes to `id`.
    pub fn config_path_for(&self, id: GuestId) -> PathBuf {
        self.config_path.with_file_name(format!("{id}.conf"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vmid_bounds() {
        assert!(validate_vmid("100").is_some());
        assert!(validate_vmid("999999998").is_some());
        assert!(validate_vmid("99").is_none());
        assert!(validate_vmid("1000000000").is_none());
        assert!(validate_vmid("abc").is_none());
        assert!(validate_vmid("").is_none());
        assert_eq!(validate_vmid(" 250 ").map(GuestId::get), Some(250));
    }

    #[test]
    fn test_validate_vmid_digits_only() {
        assert!(validate_vmid("+100").is_none());
        assert!(validate_vmid("-100").is_none());
        assert!(validate_vmid("1_000").is_none());
        assert!(validate_vmid("１００").is_none());
        assert!("+100".parse::<GuestId>().is_err());
    }

    #[test]
    fn test_config_path_for() {
        let location = GuestLocation {
            config_path: PathBuf::from("/etc/pve/nodes/pve1/lxc/101.conf"),
            host: "pve1".to_string(),
            kind: GuestKind::Container,
        };
        let target = GuestId::new(205).unwrap();
        assert_eq!(
            location.config_path_for(target),
            PathBuf::from("/etc/pve/nodes/pve1/lxc/205.conf")
        );
    }
}
