//! Storage backends and volume renames

pub mod backend;
pub mod conffile;
pub mod reassign;

pub use backend::{load_backend, StorageBackend, StorageConfig, StorageKind};
pub use reassign::{DiskReassigner, VolumeRename};
