//! Summary of a finished reassignment

use crate::guest::disk::DiskDescriptor;
use crate::guest::types::GuestId;
use crate::Result;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{error, info, warn};

/// What happened to one disk.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DiskOutcome {
    pub disk: DiskDescriptor,
    /// New volume reference on success.
    pub new_volume: Option<String>,
    pub error: Option<String>,
}

impl DiskOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReassignReport {
    pub generated: String,
    pub origin: GuestId,
    pub target: GuestId,
    pub host: String,
    pub dry_run: bool,
    pub drain_timed_out: bool,
    pub disks: Vec<DiskOutcome>,
    /// Replication job ids that could not be recreated.
    pub replication_failures: Vec<String>,
    /// Backup job ids that still list the origin id.
    pub backup_failures: Vec<String>,
    pub backup_listing_error: Option<String>,
    /// Mutations applied, or only planned in dry-run mode, in order.
    pub commands: Vec<String>,
}

impl ReassignReport {
    /// Anything the operator has to fix by hand.
    pub fn needs_followup(&self) -> bool {
        self.drain_timed_out
            || self.disks.iter().any(|d| !d.succeeded())
            || !self.replication_failures.is_empty()
            || !self.backup_failures.is_empty()
            || self.backup_listing_error.is_some()
    }

    pub fn log_summary(&self) {
        let moved = self.disks.iter().filter(|d| d.succeeded()).count();
        info!(
            "Guest {} -> {}: {}/{} disks reassigned{}",
            self.origin,
            self.target,
            moved,
            self.disks.len(),
            if self.dry_run { " (dry-run)" } else { "" }
        );
        for outcome in self.disks.iter().filter(|d| !d.succeeded()) {
            error!(
                "Disk {} ({}:{}) needs manual attention: {}",
                outcome.disk.interface,
                outcome.disk.storage,
                outcome.disk.volume,
                outcome.error.as_deref().unwrap_or_default()
            );
        }
        if !self.replication_failures.is_empty() {
            error!(
                "Replication jobs to recreate manually: {}",
                self.replication_failures.join(", ")
            );
        }
        if !self.backup_failures.is_empty() {
            error!(
                "Backup jobs to re-target manually: {}",
                self.backup_failures.join(", ")
            );
        }
        if let Some(e) = &self.backup_listing_error {
            error!("Backup jobs were not checked: {}", e);
        }
        if self.drain_timed_out {
            warn!("Replication did not drain before the rename, verify replica volumes");
        }
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let f = File::create(path)?;
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }
}
