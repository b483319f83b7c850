//! Cluster backup jobs (`pvesh /cluster/backup`)

use crate::error::BackupError;
use crate::exec::{HostCommand, Runner, Target};
use crate::guest::types::GuestId;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{error, info};

/// A backup job as returned by the cluster API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupJob {
    pub id: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Comma separated guest ids; absent for "all guests" or pool jobs.
    #[serde(default)]
    pub vmid: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BackupJob {
    fn label(&self) -> String {
        match &self.comment {
            Some(comment) => format!("{} ({})", self.id, comment),
            None => self.id.clone(),
        }
    }
}

/// `vmid` list with `origin` replaced by `target` appended at the end, or
/// `None` when `origin` is not listed.
pub fn retarget_vmids(vmids: &str, origin: GuestId, target: GuestId) -> Option<String> {
    let (origin, target) = (origin.to_string(), target.to_string());
    let mut ids: Vec<&str> = vmids.split(',').map(str::trim).collect();
    let before = ids.len();
    ids.retain(|id| *id != origin);
    if ids.len() == before {
        return None;
    }
    ids.push(&target);
    Some(ids.join(","))
}

pub struct BackupClient<'r, 'e> {
    runner: &'r Runner<'e>,
}

impl<'r, 'e> BackupClient<'r, 'e> {
    pub fn new(runner: &'r Runner<'e>) -> Self {
        Self { runner }
    }

    pub fn list_jobs(&self) -> Result<Vec<BackupJob>, BackupError> {
        let cmd = HostCommand::new("pvesh").args([
            "get",
            "/cluster/backup",
            "--output-format",
            "json-pretty",
        ]);
        let out = self.runner.query(&cmd, &Target::Local)?;
        Ok(serde_json::from_str(&out)?)
    }

    /// Push each attribute separately; returns the keys that failed.
    pub fn set_attrs(&self, job_id: &str, attrs: &BTreeMap<String, String>) -> Vec<String> {
        let mut failed = Vec::new();
        for (key, value) in attrs {
            let cmd = HostCommand::new("pvesh").args([
                "set".to_string(),
                format!("/cluster/backup/{job_id}"),
                format!("-{key}"),
                value.clone(),
            ]);
            if let Err(e) = self.runner.apply(&cmd, &Target::Local) {
                error!("Could not set {} on backup job {}: {}", key, job_id, e);
                failed.push(key.clone());
            }
        }
        failed
    }

    /// Move `origin` to `target` in every job listing it. Returns the ids of
    /// jobs that could not be updated.
    pub fn retarget_guest(&self, origin: GuestId, target: GuestId) -> Result<Vec<String>, BackupError> {
        let mut failed = Vec::new();
        for job in self.list_jobs()? {
            let Some(vmids) = job.vmid.as_deref() else {
                continue;
            };
            let Some(updated) = retarget_vmids(vmids, origin, target) else {
                info!("Guest not in backup job {}, skipping", job.label());
                continue;
            };
            let attrs = BTreeMap::from([("vmid".to_string(), updated)]);
            if self.set_attrs(&job.id, &attrs).is_empty() {
                info!("Modified backup job {}", job.label());
            } else {
                failed.push(job.id.clone());
            }
        }
        if !failed.is_empty() {
            error!("Unable to re-target some backup jobs, please fix them manually: {:?}", failed);
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, Executor, Mode};
    use std::cell::RefCell;

    fn id(raw: u32) -> GuestId {
        GuestId::new(raw).unwrap()
    }

    #[test]
    fn test_retarget_vmids() {
        assert_eq!(
            retarget_vmids("100,101,102", id(101), id(250)).as_deref(),
            Some("100,102,250")
        );
        assert_eq!(retarget_vmids("100", id(100), id(200)).as_deref(), Some("200"));
        assert_eq!(retarget_vmids("1000,10", id(100), id(200)), None);
    }

    const JOBS: &str = r#"[
  {"id": "backup-a1", "comment": "nightly", "vmid": "100,101", "schedule": "21:00", "enabled": 1},
  {"id": "backup-b2", "all": 1, "schedule": "sun 01:00"},
  {"id": "backup-c3", "vmid": "100"}
]"#;

    struct Api {
        calls: RefCell<Vec<Vec<String>>>,
        fail_job: &'static str,
    }

    impl Executor for Api {
        fn execute(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
            self.calls.borrow_mut().push(argv.to_vec());
            let failing = argv.iter().any(|a| a.ends_with(self.fail_job));
            Ok(CommandOutput {
                exit_code: Some(if argv[1] == "set" && failing { 2 } else { 0 }),
                stdout: if argv[1] == "get" { JOBS.to_string() } else { String::new() },
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn test_list_jobs_keeps_unknown_fields() {
        let exec = Api {
            calls: RefCell::new(Vec::new()),
            fail_job: "none",
        };
        let runner = Runner::new(&exec, Mode::Apply);
        let jobs = BackupClient::new(&runner).list_jobs().unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].comment.as_deref(), Some("nightly"));
        assert_eq!(jobs[1].vmid, None);
        assert!(jobs[1].extra.contains_key("all"));
    }

    #[test]
    fn test_retarget_guest_collects_failures() {
        let exec = Api {
            calls: RefCell::new(Vec::new()),
            fail_job: "backup-c3",
        };
        let runner = Runner::new(&exec, Mode::Apply);
        let failed = BackupClient::new(&runner)
            .retarget_guest(id(100), id(200))
            .unwrap();
        assert_eq!(failed, vec!["backup-c3"]);

        let calls = exec.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[1],
            vec!["pvesh", "set", "/cluster/backup/backup-a1", "-vmid", "101,200"]
        );
    }

    #[test]
    fn test_retarget_guest_dry_run_only_reads() {
        let exec = Api {
            calls: RefCell::new(Vec::new()),
            fail_job: "none",
        };
        let runner = Runner::new(&exec, Mode::DryRun);
        let failed = BackupClient::new(&runner)
            .retarget_guest(id(100), id(200))
            .unwrap();
        assert!(failed.is_empty());
        assert_eq!(exec.calls.borrow().len(), 1);
        assert_eq!(runner.journal().len(), 2);
    }
}
