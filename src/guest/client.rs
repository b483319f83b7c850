//! Guest management commands (`qm` / `pct`)

use crate::error::GuestError;
use crate::exec::{HostCommand, Runner, Target};
use crate::guest::config::GuestConfig;
use crate::guest::types::{GuestId, GuestKind};
use tracing::info;

/// Which configuration revision to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigView<'s> {
    /// Pending changes are not applied.
    Default,
    /// `--current`: the running values.
    Current,
    /// `--snapshot NAME`.
    Snapshot(&'s str),
}

impl<'s> ConfigView<'s> {
    /// Build a view from the separate flags callers carry around.
    pub fn from_flags(snapshot: Option<&'s str>, current: bool) -> Result<Self, GuestError> {
        match (snapshot, current) {
            (Some(_), true) => Err(GuestError::InvalidArgument(
                "current and snapshot cannot be requested at the same time".into(),
            )),
            (Some(name), false) => Ok(ConfigView::Snapshot(name)),
            (None, true) => Ok(ConfigView::Current),
            (None, false) => Ok(ConfigView::Default),
        }
    }
}

/// Runs `qm`/`pct` against one guest on the host owning it.
pub struct GuestClient<'r, 'e> {
    runner: &'r Runner<'e>,
    id: GuestId,
    kind: GuestKind,
    target: Target,
}

impl<'r, 'e> GuestClient<'r, 'e> {
    pub fn new(runner: &'r Runner<'e>, id: GuestId, kind: GuestKind, target: Target) -> Self {
        Self {
            runner,
            id,
            kind,
            target,
        }
    }

    fn command(&self, sub: &str) -> HostCommand {
        HostCommand::new(self.kind.command())
            .arg(sub)
            .arg(self.id.to_string())
    }

    /// Power state as reported by `status` (e.g. `stopped`, `running`).
    pub fn status(&self) -> Result<String, GuestError> {
        let out = self.runner.query(&self.command("status"), &self.target)?;
        let first = out.lines().next().unwrap_or_default().trim();
        Ok(first.rsplit(": ").next().unwrap_or(first).trim().to_string())
    }

    /// Read and parse the guest configuration.
    pub fn read_config(&self, view: ConfigView<'_>) -> Result<GuestConfig, GuestError> {
        let mut cmd = self.command("config");
        match view {
            ConfigView::Default => {
                info!("Collecting config for guest {}", self.id);
            }
            ConfigView::Current => {
                info!("Collecting config for guest {}", self.id);
                cmd = cmd.arg("--current");
            }
            ConfigView::Snapshot(name) => {
                info!("Collecting config for guest {} (snapshot {})", self.id, name);
                cmd = cmd.args(["--snapshot", name]);
            }
        }
        let out = self.runner.query(&cmd, &self.target)?;
        GuestConfig::parse(&out)
    }

    /// Snapshot names, excluding the `current` pseudo-snapshot.
    pub fn list_snapshots(&self) -> Result<Vec<String>, GuestError> {
        let out = self.runner.query(&self.command("listsnapshot"), &self.target)?;
        parse_snapshot_listing(&out)
    }
}

/// Extract snapshot names from `listsnapshot` output (second column).
pub fn parse_snapshot_listing(text: &str) -> Result<Vec<String>, GuestError> {
    let mut snapshots = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(name) = trimmed.split_whitespace().nth(1) else {
            return Err(GuestError::MalformedSnapshotLine {
                line: line.to_string(),
            });
        };
        if name != "current" {
            snapshots.push(name.to_string());
        }
    }
    Ok(snapshots)
}
