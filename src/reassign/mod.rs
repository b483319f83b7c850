//! Guest id reassignment
//!
//! [`Reassigner::run`] walks a fixed sequence of stages. Everything up to and
//! including [`Stage::Draining`] only reads, except for the replication job
//! deletions; a failure there leaves the guest untouched. From
//! [`Stage::Renaming`] on the guest lives under its new id, so later failures
//! are collected per disk or job and reported instead of aborting.
//!
//! Dry-run is handled entirely by the [`Runner`]: the stages run the same
//! way and mutations are only logged.

pub mod report;

use crate::backup::BackupClient;
use crate::cli::prompt::Confirm;
use crate::config::{DrainPolicy, Settings};
use crate::error::{DiskReassignError, GuestError, ReassignError};
use crate::exec::{HostCommand, Runner, Target};
use crate::guest::disk::{collect_disks, snapshot_vmstate, DiskDescriptor};
use crate::guest::{ConfigView, GuestClient, GuestId, GuestLocation, Locator};
use crate::replication::{self, ReplicationJob, ReplicationManager, HEALTHY_STATE};
use crate::storage::{load_backend, DiskReassigner};
use crate::utils::system::{now_utc, CancellationToken};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use report::{DiskOutcome, ReassignReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Confirming,
    Draining,
    Renaming,
    Reassigning,
    RebuildingReplication,
    PatchingBackups,
    Done,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Confirming => "confirming",
            Stage::Draining => "draining",
            Stage::Renaming => "renaming",
            Stage::Reassigning => "reassigning",
            Stage::RebuildingReplication => "rebuilding replication",
            Stage::PatchingBackups => "patching backups",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Parameters of one `change-id` run.
#[derive(Debug, Clone)]
pub struct ReassignRequest {
    pub origin: GuestId,
    pub target: GuestId,
    pub remote_user: String,
    /// Skip both confirmation prompts.
    pub assume_yes: bool,
    pub verbose: bool,
    pub drain_timeout: Duration,
    pub drain_policy: DrainPolicy,
}

impl ReassignRequest {
    /// Request with drain settings taken from `settings`.
    pub fn new(origin: GuestId, target: GuestId, settings: &Settings) -> Self {
        Self {
            origin,
            target,
            remote_user: "root".to_string(),
            assume_yes: false,
            verbose: false,
            drain_timeout: Duration::from_secs(settings.replication.drain_timeout_secs),
            drain_policy: settings.replication.drain_policy,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// The operator declined a confirmation; nothing was changed.
    Aborted,
    Completed(ReassignReport),
}

/// Everything collected before the first mutation.
struct Plan {
    location: GuestLocation,
    target: Target,
    disks: Vec<DiskDescriptor>,
    jobs: BTreeMap<String, ReplicationJob>,
    replication_active: bool,
}

pub struct Reassigner<'a, 'e> {
    settings: &'a Settings,
    runner: &'a Runner<'e>,
    confirm: &'a dyn Confirm,
    token: &'a CancellationToken,
    local_host: String,
}

impl<'a, 'e> Reassigner<'a, 'e> {
    pub fn new(
        settings: &'a Settings,
        runner: &'a Runner<'e>,
        confirm: &'a dyn Confirm,
        token: &'a CancellationToken,
        local_host: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            runner,
            confirm,
            token,
            local_host: local_host.into(),
        }
    }

    fn enter(&self, stage: Stage) -> Result<(), ReassignError> {
        if self.token.is_cancelled() {
            warn!("Interrupted before {}", stage);
            return Err(ReassignError::Interrupted);
        }
        debug!("stage: {}", stage);
        Ok(())
    }

    fn replication(&self, target: &Target) -> ReplicationManager<'_, 'e> {
        ReplicationManager::new(
            self.runner,
            target.clone(),
            Duration::from_millis(self.settings.replication.poll_interval_ms),
        )
    }

    pub fn run(&self, req: &ReassignRequest) -> Result<Outcome, ReassignError> {
        self.enter(Stage::Validating)?;
        let (location, target, has_statuses) = self.validate(req)?;

        self.enter(Stage::Confirming)?;
        let client = GuestClient::new(self.runner, req.origin, location.kind, target.clone());
        let snapshots = client.list_snapshots()?;
        if !self.confirmed(req, &snapshots)? {
            info!("Guest id change cancelled");
            debug!("stage: {}", Stage::Aborted);
            return Ok(Outcome::Aborted);
        }
        let disks = self.collect_volumes(&client, &snapshots)?;
        let jobs = replication::list_jobs(&self.settings.paths.replication_cfg, req.origin)?;
        let replication_active = has_statuses || !jobs.is_empty();
        let plan = Plan {
            location,
            target,
            disks,
            jobs,
            replication_active,
        };

        self.enter(Stage::Draining)?;
        let state = client.status()?;
        if state != "stopped" {
            return Err(ReassignError::GuestNotStopped {
                id: req.origin,
                state,
            });
        }
        let drain_timed_out = self.drain(req, &plan)?;

        self.enter(Stage::Renaming)
            .map_err(|e| self.jobs_lost(&plan, req.origin, e))?;
        let new_config = plan.location.config_path_for(req.target);
        info!(
            "Moving guest config {} to {}",
            plan.location.config_path.display(),
            new_config.display()
        );
        let mv = HostCommand::new("mv").args([
            plan.location.config_path.display().to_string(),
            new_config.display().to_string(),
        ]);
        self.runner
            .apply(&mv, &plan.target)
            .map_err(|e| self.jobs_lost(&plan, req.origin, e.into()))?;

        self.enter(Stage::Reassigning)
            .map_err(|e| self.jobs_lost(&plan, req.target, e))?;
        let reassigner = DiskReassigner::new(self.runner, plan.target.clone());
        let mut disks = Vec::with_capacity(plan.disks.len());
        for disk in &plan.disks {
            if self.token.is_cancelled() {
                return Err(self.jobs_lost(&plan, req.target, ReassignError::Interrupted));
            }
            let result = load_backend(&self.settings.paths.storage_cfg, &disk.storage)
                .map_err(DiskReassignError::from)
                .and_then(|backend| {
                    reassigner.reassign_disk(&backend, &disk.volume, req.origin, req.target, &new_config)
                });
            disks.push(match result {
                Ok(rename) => DiskOutcome {
                    disk: disk.clone(),
                    new_volume: Some(rename.new_reference()),
                    error: None,
                },
                Err(e) => {
                    error!("Could not reassign disk {} ({}): {}", disk.interface, disk.volume, e);
                    DiskOutcome {
                        disk: disk.clone(),
                        new_volume: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }

        self.enter(Stage::RebuildingReplication)
            .map_err(|e| self.jobs_lost(&plan, req.target, e))?;
        let manager = self.replication(&plan.target);
        let mut replication_failures = Vec::new();
        for job in plan.jobs.values() {
            let moved = job.retarget(req.target);
            if let Err(e) = manager.create_job(&moved) {
                error!("Could not recreate replication job {}: {}", moved.id, e);
                replication_failures.push(moved.id);
            }
        }

        self.enter(Stage::PatchingBackups)?;
        let (backup_failures, backup_listing_error) =
            match BackupClient::new(self.runner).retarget_guest(req.origin, req.target) {
                Ok(failed) => (failed, None),
                Err(e) => {
                    error!("Could not list backup jobs: {}", e);
                    (Vec::new(), Some(e.to_string()))
                }
            };

        debug!("stage: {}", Stage::Done);
        Ok(Outcome::Completed(ReassignReport {
            generated: now_utc(),
            origin: req.origin,
            target: req.target,
            host: plan.location.host,
            dry_run: self.runner.is_dry_run(),
            drain_timed_out,
            disks,
            replication_failures,
            backup_failures,
            backup_listing_error,
            commands: self.runner.journal(),
        }))
    }

    /// Resolve the origin and check preconditions. The flag tells whether
    /// the origin had any replication status at all.
    fn validate(
        &self,
        req: &ReassignRequest,
    ) -> Result<(GuestLocation, Target, bool), ReassignError> {
        let locator = Locator::new(&self.settings.paths.nodes_dir);
        let location = locator.locate(req.origin).map_err(|e| match e {
            GuestError::NotFound { id } => ReassignError::GuestNotFound { id },
            other => other.into(),
        })?;
        if locator.list_all(&[req.target])?.contains(req.target) {
            return Err(ReassignError::GuestAlreadyExists { id: req.target });
        }

        let target = if location.host == self.local_host {
            Target::Local
        } else {
            let remote = &self.settings.remote;
            Target::ssh(
                &remote.ssh_program,
                &remote.ssh_options,
                &req.remote_user,
                &location.host,
            )
        };
        if req.verbose {
            info!(
                "Guest {} ({}) is on {}, config at {}",
                req.origin,
                location.kind,
                target,
                location.config_path.display()
            );
        }

        let statuses = self.replication(&target).get_statuses(req.origin);
        let has_statuses = !statuses.is_empty();
        let unhealthy: Vec<(String, String)> = statuses
            .into_iter()
            .filter(|(_, state)| state != HEALTHY_STATE)
            .collect();
        if !unhealthy.is_empty() {
            return Err(ReassignError::ReplicationInProgress {
                id: req.origin,
                jobs: unhealthy,
            });
        }
        Ok((location, target, has_statuses))
    }

    fn confirmed(&self, req: &ReassignRequest, snapshots: &[String]) -> Result<bool, ReassignError> {
        if req.assume_yes {
            return Ok(true);
        }
        warn!("This might break replication and backup configurations");
        let question = format!(
            "Change guest id {} to {}? Make sure the guest is stopped and not replicating",
            req.origin, req.target
        );
        if !self.confirm.confirm(&question).map_err(ReassignError::from_prompt)? {
            return Ok(false);
        }
        if snapshots.is_empty() {
            return Ok(true);
        }
        let question = format!(
            "Guest {} has snapshots ({}); its replication jobs will be deleted and re-created. Continue?",
            req.origin,
            snapshots.join(", ")
        );
        self.confirm.confirm(&question).map_err(ReassignError::from_prompt)
    }

    /// Volumes of the current config plus every snapshot's memory state, once each.
    fn collect_volumes(
        &self,
        client: &GuestClient<'_, 'e>,
        snapshots: &[String],
    ) -> Result<Vec<DiskDescriptor>, ReassignError> {
        let mut disks = collect_disks(&client.read_config(ConfigView::Current)?, true)?;
        for snapshot in snapshots {
            let config = client.read_config(ConfigView::Snapshot(snapshot.as_str()))?;
            if let Some(vmstate) = snapshot_vmstate(&config)? {
                disks.push(vmstate);
            }
        }
        let mut seen = BTreeSet::new();
        disks.retain(|d| seen.insert((d.storage.clone(), d.volume.clone())));
        for disk in &disks {
            debug!("volume {}: {}:{}", disk.interface, disk.storage, disk.volume);
        }
        Ok(disks)
    }

    /// Tell the operator how to restore replication jobs already deleted
    /// before `err` stopped the run. `guest` is the id the config lives under.
    fn jobs_lost(&self, plan: &Plan, guest: GuestId, err: ReassignError) -> ReassignError {
        if plan.replication_active && !self.runner.is_dry_run() {
            for job in plan.jobs.values() {
                error!(
                    "Replication job {} was deleted, recreate it with: {}",
                    job.id,
                    job.retarget(guest).create_command()
                );
            }
        }
        err
    }

    /// Delete replication jobs and wait for them to go away. Returns whether
    /// the wait timed out.
    fn drain(&self, req: &ReassignRequest, plan: &Plan) -> Result<bool, ReassignError> {
        if !plan.replication_active {
            return Ok(false);
        }
        let manager = self.replication(&plan.target);
        for job in plan.jobs.values() {
            info!("Replication job {} is defined as: {}", job.id, job.create_command());
            manager.delete_job(&job.id)?;
        }
        if self.runner.is_dry_run() {
            info!("[dry-run] not waiting for replication of guest {} to drain", req.origin);
            return Ok(false);
        }
        let drained = manager
            .await_drain(req.origin, req.drain_timeout, self.token)
            .map_err(|_| self.jobs_lost(plan, req.origin, ReassignError::Interrupted))?;
        if drained {
            return Ok(false);
        }
        match req.drain_policy {
            DrainPolicy::Abort => Err(self.jobs_lost(
                plan,
                req.origin,
                ReassignError::ReplicationDrainTimeout {
                    id: req.origin,
                    timeout_secs: req.drain_timeout.as_secs(),
                },
            )),
            DrainPolicy::Warn => {
                warn!(
                    "Proceeding although replication of guest {} has not drained",
                    req.origin
                );
                Ok(true)
            }
        }
    }
}
