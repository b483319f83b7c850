//! Cluster storage configuration (`storage.cfg`)
//!
//! Stanzas look like:
//!
//! ```text
//! lvmthin: local-lvm
//!         thinpool data
//!         vgname pve
//!         content rootdir,images
//! ```

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Storage types whose volumes can be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Lvm,
    LvmThin,
    ZfsPool,
    Dir,
    CephFs,
    Rbd,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Lvm => "lvm",
            StorageKind::LvmThin => "lvmthin",
            StorageKind::ZfsPool => "zfspool",
            StorageKind::Dir => "dir",
            StorageKind::CephFs => "cephfs",
            StorageKind::Rbd => "rbd",
        }
    }

    /// Attribute holding the volume group, pool or mount path.
    pub fn path_attribute(self) -> &'static str {
        match self {
            StorageKind::Lvm | StorageKind::LvmThin => "vgname",
            StorageKind::ZfsPool | StorageKind::Rbd => "pool",
            StorageKind::Dir | StorageKind::CephFs => "path",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "lvm" => StorageKind::Lvm,
            "lvmthin" => StorageKind::LvmThin,
            "zfspool" => StorageKind::ZfsPool,
            "dir" => StorageKind::Dir,
            "cephfs" => StorageKind::CephFs,
            "rbd" => StorageKind::Rbd,
            _ => return Err(()),
        })
    }
}

/// A resolved storage definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBackend {
    pub name: String,
    pub kind: StorageKind,
    pub path: String,
    pub extra: BTreeMap<String, String>,
}

impl StorageBackend {
    /// LVM storages restricted to tagged volumes need their tags moved too.
    pub fn tagged_only(&self) -> bool {
        matches!(
            self.extra.get("tagged_only").map(String::as_str),
            Some("1") | Some("yes") | Some("true") | Some("on")
        )
    }

    /// Render back into `storage.cfg` stanza syntax.
    pub fn to_stanza(&self) -> String {
        let mut out = format!("{}: {}\n", self.kind, self.name);
        out.push_str(&format!("\t{} {}\n", self.kind.path_attribute(), self.path));
        for (key, value) in &self.extra {
            if value.is_empty() {
                out.push_str(&format!("\t{key}\n"));
            } else {
                out.push_str(&format!("\t{key} {value}\n"));
            }
        }
        out
    }
}

/// One raw stanza before type validation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Stanza {
    kind: String,
    name: String,
    attrs: BTreeMap<String, String>,
}

/// All stanzas of a storage config file.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    stanzas: Vec<Stanza>,
}

impl StorageConfig {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let text = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, StorageError> {
        let mut stanzas: Vec<Stanza> = Vec::new();
        let mut open = false;
        for line in text.lines() {
            let content = line.trim_end();
            if content.trim().is_empty() {
                open = false;
                continue;
            }
            if content.trim_start().starts_with('#') {
                continue;
            }
            let indented = content.starts_with(|c: char| c.is_whitespace());
            if !indented {
                let Some((kind, name)) = content.split_once(": ") else {
                    return Err(StorageError::MalformedStanza {
                        line: line.to_string(),
                    });
                };
                stanzas.push(Stanza {
                    kind: kind.trim().to_string(),
                    name: name.trim().to_string(),
                    attrs: BTreeMap::new(),
                });
                open = true;
                continue;
            }
            let Some(stanza) = stanzas.last_mut().filter(|_| open) else {
                return Err(StorageError::MalformedStanza {
                    line: line.to_string(),
                });
            };
            let attr = content.trim();
            let (key, value) = attr.split_once(char::is_whitespace).unwrap_or((attr, ""));
            stanza
                .attrs
                .insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { stanzas })
    }

    /// Resolve the stanza named `name`.
    pub fn backend(&self, name: &str) -> Result<StorageBackend, StorageError> {
        let stanza = self
            .stanzas
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StorageError::UnknownStorage {
                name: name.to_string(),
            })?;
        let kind: StorageKind =
            stanza
                .kind
                .parse()
                .map_err(|_| StorageError::UnsupportedStorageKind {
                    name: name.to_string(),
                    kind: stanza.kind.clone(),
                })?;
        let attribute = kind.path_attribute();
        let mut extra = stanza.attrs.clone();
        let path = extra
            .remove(attribute)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StorageError::MissingPathAttribute {
                name: name.to_string(),
                kind: stanza.kind.clone(),
                attribute,
            })?;
        Ok(StorageBackend {
            name: stanza.name.clone(),
            kind,
            path,
            extra,
        })
    }
}

/// Read `path` and resolve the storage named `name`.
pub fn load_backend(path: &Path, name: &str) -> Result<StorageBackend, StorageError> {
    StorageConfig::load(path)?.backend(name)
}
