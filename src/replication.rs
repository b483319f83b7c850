//! Storage replication jobs (`pvesr`)
//!
//! Jobs are read from the cluster replication config, where each job is a
//! `local: <guest>-<n>` header followed by indented `key value` lines.

use crate::error::{CommandError, ReplicationError};
use crate::exec::{HostCommand, Runner, Target};
use crate::guest::types::{validate_vmid, GuestId};
use crate::utils::system::CancellationToken;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State string `pvesr status` reports for a healthy job.
pub const HEALTHY_STATE: &str = "OK";

/// One `local:` replication job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationJob {
    pub id: String,
    pub guest: GuestId,
    pub target: String,
    pub schedule: Option<String>,
    pub rate: Option<String>,
    pub comment: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl ReplicationJob {
    /// The same job with its id moved to `new_guest` (`100-0` -> `200-0`).
    pub fn retarget(&self, new_guest: GuestId) -> ReplicationJob {
        let suffix = self.id.split_once('-').map(|(_, n)| n).unwrap_or("0");
        ReplicationJob {
            id: format!("{new_guest}-{suffix}"),
            guest: new_guest,
            ..self.clone()
        }
    }

    /// The `pvesr` invocation that (re)creates this job.
    pub fn create_command(&self) -> HostCommand {
        let mut cmd = HostCommand::new("pvesr").args(["create-local-job", &self.id, &self.target]);
        for (flag, value) in [
            ("--rate", &self.rate),
            ("--schedule", &self.schedule),
            ("--comment", &self.comment),
        ] {
            if let Some(value) = value {
                cmd = cmd.args([flag, value.as_str()]);
            }
        }
        cmd
    }
}

/// Guest id encoded in a `<guest>-<n>` job id.
pub fn job_guest(job_id: &str) -> Option<GuestId> {
    job_id.split_once('-').and_then(|(guest, _)| validate_vmid(guest))
}

/// Parse every job in a replication config.
pub fn parse_jobs(text: &str) -> Result<Vec<ReplicationJob>, ReplicationError> {
    struct Partial {
        id: String,
        guest: GuestId,
        attrs: BTreeMap<String, String>,
    }

    let mut partials: Vec<Partial> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(id) = trimmed.strip_prefix("local:") {
            let id = id.trim();
            let guest = job_guest(id).ok_or_else(|| ReplicationError::MalformedJobLine {
                line: line.to_string(),
            })?;
            partials.push(Partial {
                id: id.to_string(),
                guest,
                attrs: BTreeMap::new(),
            });
            continue;
        }
        let Some(job) = partials.last_mut() else {
            return Err(ReplicationError::MalformedJobLine {
                line: line.to_string(),
            });
        };
        let (key, value) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        job.attrs.insert(key.to_string(), value.trim().to_string());
    }

    partials
        .into_iter()
        .map(|mut p| {
            let target = p
                .attrs
                .remove("target")
                .ok_or_else(|| ReplicationError::MissingTarget { job: p.id.clone() })?;
            Ok(ReplicationJob {
                schedule: p.attrs.remove("schedule"),
                rate: p.attrs.remove("rate"),
                comment: p.attrs.remove("comment"),
                id: p.id,
                guest: p.guest,
                target,
                extra: p.attrs,
            })
        })
        .collect()
}

/// Jobs of `guest` in the replication config at `path`; a missing file has none.
pub fn list_jobs(
    path: &Path,
    guest: GuestId,
) -> Result<BTreeMap<String, ReplicationJob>, ReplicationError> {
    if !path.exists() {
        debug!("{} does not exist, no replication jobs", path.display());
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path).map_err(|source| ReplicationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_jobs(&text)?
        .into_iter()
        .filter(|job| job.guest == guest)
        .map(|job| (job.id.clone(), job))
        .collect())
}

/// Job id -> state from `pvesr status` output (header line skipped).
pub fn parse_statuses(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let job = fields.next()?;
            let state = fields.last()?;
            Some((job.to_string(), state.to_string()))
        })
        .collect()
}

/// Drives `pvesr` on one host.
pub struct ReplicationManager<'r, 'e> {
    runner: &'r Runner<'e>,
    target: Target,
    poll_interval: Duration,
}

impl<'r, 'e> ReplicationManager<'r, 'e> {
    pub fn new(runner: &'r Runner<'e>, target: Target, poll_interval: Duration) -> Self {
        Self {
            runner,
            target,
            poll_interval,
        }
    }

    /// Current job states for `guest`; empty when none exist or the query fails.
    pub fn get_statuses(&self, guest: GuestId) -> BTreeMap<String, String> {
        let cmd = HostCommand::new("pvesr").args(["status", "--guest", &guest.to_string()]);
        match self.runner.query(&cmd, &self.target) {
            Ok(out) => parse_statuses(&out),
            Err(e) => {
                debug!("no replication status for guest {}: {}", guest, e);
                BTreeMap::new()
            }
        }
    }

    pub fn delete_job(&self, job_id: &str) -> Result<(), CommandError> {
        info!("Deleting replication job {}", job_id);
        self.runner
            .apply(&HostCommand::new("pvesr").args(["delete", job_id]), &self.target)
    }

    pub fn create_job(&self, job: &ReplicationJob) -> Result<(), CommandError> {
        info!("Creating replication job {} to {}", job.id, job.target);
        self.runner.apply(&job.create_command(), &self.target)
    }

    /// Poll until `guest` has no replication jobs left. `Ok(false)` means the
    /// timeout elapsed first; `Err` means the token was cancelled.
    pub fn await_drain(
        &self,
        guest: GuestId,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<bool, Interrupted> {
        let started = Instant::now();
        loop {
            if token.is_cancelled() {
                return Err(Interrupted);
            }
            let pending = self.get_statuses(guest);
            if pending.is_empty() {
                info!("Replication for guest {} drained", guest);
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                warn!(
                    "Replication for guest {} still pending after {}s: {:?}",
                    guest,
                    timeout.as_secs(),
                    pending
                );
                return Ok(false);
            }
            debug!("waiting on replication jobs {:?}", pending.keys());
            thread::sleep(self.poll_interval);
        }
    }
}

/// The wait was cut short by an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;
