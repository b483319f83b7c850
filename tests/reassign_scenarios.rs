use pvetk::cli::prompt::{AssumeYes, Confirm};
use pvetk::config::{DrainPolicy, Settings};
use pvetk::error::ReassignError;
use pvetk::exec::{CommandOutput, Executor, Mode, Runner};
use pvetk::utils::system::CancellationToken;
use pvetk::{GuestId, Outcome, ReassignReport, ReassignRequest, Reassigner};
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const STORAGE_CFG: &str = "\
dir: local
\tpath /var/lib/vz
\tcontent iso,vztmpl,backup

lvmthin: local-lvm
\tthinpool data
\tvgname pve
\tcontent rootdir,images

zfspool: tank
\tpool tank/guests

nfs: nas
\tpath /mnt/pve/nas
\tserver 10.0.0.5
";

const VM_CONFIG: &str = "\
boot: order=scsi0;net0
cores: 2
efidisk0: local-lvm:vm-100-disk-2,efitype=4m,size=4M
ide2: local:iso/debian-12.iso,media=cdrom
name: web
net0: virtio=BC:24:11:2A:8C:10,bridge=vmbr0
scsi0: local-lvm:vm-100-disk-0,size=32G
scsi1: tank:vm-100-disk-1,size=8G
";

const PVESR_HEADER: &str =
    "JobID Enabled Target LastSync NextSync Duration FailCount State\n";

/// Temporary cluster tree with VM 100 on `node` (pve1 unless stated).
struct Cluster {
    dir: TempDir,
    node: &'static str,
    settings: Settings,
}

impl Cluster {
    fn new(guest_config: &str) -> Self {
        Self::on_node("pve1", guest_config)
    }

    fn on_node(node: &'static str, guest_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let qemu = dir.path().join(format!("nodes/{node}/qemu-server"));
        fs::create_dir_all(&qemu).unwrap();
        fs::create_dir_all(dir.path().join("nodes/pve1/lxc")).unwrap();
        fs::create_dir_all(dir.path().join("nodes/pve2/lxc")).unwrap();
        fs::write(qemu.join("100.conf"), guest_config).unwrap();
        fs::write(dir.path().join("storage.cfg"), STORAGE_CFG).unwrap();

        let mut settings = Settings::default();
        settings.paths.nodes_dir = dir.path().join("nodes");
        settings.paths.storage_cfg = dir.path().join("storage.cfg");
        settings.paths.replication_cfg = dir.path().join("replication.cfg");
        settings.replication.poll_interval_ms = 1;
        Self {
            dir,
            node,
            settings,
        }
    }

    fn guest_conf(&self, id: u32) -> PathBuf {
        self.dir
            .path()
            .join(format!("nodes/{}/qemu-server/{id}.conf", self.node))
    }

    fn with_replication(self, text: &str) -> Self {
        fs::write(&self.settings.paths.replication_cfg, text).unwrap();
        self
    }
}

/// Splits `ssh [options] user@host command...` into the host and the command.
fn split_remote(argv: &[String]) -> (Option<&str>, &[String]) {
    if argv.first().map(String::as_str) != Some("ssh") {
        return (None, argv);
    }
    match argv.iter().position(|a| a.contains('@')) {
        Some(at) => (argv[at].split_once('@').map(|(_, host)| host), &argv[at + 1..]),
        None => (None, argv),
    }
}

/// Answers `qm`, `pvesr` and `pvesh` the way a node would, locally or behind
/// ssh; moves files inside the cluster tree for `mv`. `failing` exits 1.
struct FakePve {
    root: PathBuf,
    config: String,
    snapshot_config: Option<String>,
    status: &'static str,
    replication_state: RefCell<Option<&'static str>>,
    drains: bool,
    failing: Option<&'static str>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl FakePve {
    fn new(cluster: &Cluster, config: &str) -> Self {
        Self {
            root: cluster.dir.path().to_path_buf(),
            config: config.to_string(),
            snapshot_config: None,
            status: "stopped",
            replication_state: RefCell::new(None),
            drains: true,
            failing: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn called(&self, program: &str, sub: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .map(|argv| split_remote(argv).1)
            .filter(|cmd| cmd[0] == program && cmd.get(1).map(String::as_str) == Some(sub))
            .count()
    }

    fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|argv| split_remote(argv).1[0].clone())
            .collect()
    }
}

impl Executor for FakePve {
    fn execute(&self, argv: &[String]) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(argv.to_vec());
        let args: Vec<&str> = split_remote(argv).1.iter().map(String::as_str).collect();
        if args.first().copied() == self.failing {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "permission denied\n".to_string(),
            });
        }
        let stdout = match args.as_slice() {
            ["qm", "listsnapshot", _] => match self.snapshot_config {
                Some(_) => "`-> nightly 2024-05-02 02:00:00 no-description\n    `-> current You are here!\n".to_string(),
                None => "`-> current You are here!\n".to_string(),
            },
            ["qm", "config", _, "--snapshot", _] => self.snapshot_config.clone().unwrap_or_default(),
            ["qm", "config", ..] => self.config.clone(),
            ["qm", "status", _] => format!("status: {}\n", self.status),
            ["pvesr", "status", ..] => {
                let mut out = PVESR_HEADER.to_string();
                if let Some(state) = *self.replication_state.borrow() {
                    out.push_str(&format!("100-0 Yes local/pve2 - - 1.0 0 {state}\n"));
                }
                out
            }
            ["pvesr", "delete", _] => {
                if self.drains {
                    *self.replication_state.borrow_mut() = None;
                }
                String::new()
            }
            ["pvesh", "get", ..] => "[]".to_string(),
            ["mv", from, to] if Path::new(from).starts_with(&self.root) => {
                fs::rename(from, to)?;
                String::new()
            }
            _ => String::new(),
        };
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

struct Decline;

impl Confirm for Decline {
    fn confirm(&self, _question: &str) -> io::Result<bool> {
        Ok(false)
    }
}

fn id(raw: u32) -> GuestId {
    GuestId::new(raw).unwrap()
}

fn request(cluster: &Cluster, origin: u32, target: u32) -> ReassignRequest {
    let mut req = ReassignRequest::new(id(origin), id(target), &cluster.settings);
    req.assume_yes = true;
    req
}

fn run(
    cluster: &Cluster,
    exec: &FakePve,
    mode: Mode,
    confirm: &dyn Confirm,
    req: &ReassignRequest,
) -> (Result<Outcome, ReassignError>, Vec<String>) {
    let runner = Runner::new(exec, mode);
    let token = CancellationToken::new();
    let result = Reassigner::new(&cluster.settings, &runner, confirm, &token, "pve1").run(req);
    (result, runner.journal())
}

fn completed(result: Result<Outcome, ReassignError>) -> ReassignReport {
    match result {
        Ok(Outcome::Completed(report)) => report,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[test]
fn test_dry_run_plans_one_move_and_one_rename_per_disk() {
    let cluster = Cluster::new(VM_CONFIG);
    let exec = FakePve::new(&cluster, VM_CONFIG);
    let (result, journal) = run(&cluster, &exec, Mode::DryRun, &AssumeYes, &request(&cluster, 100, 200));
    let report = completed(result);

    assert!(report.dry_run);
    assert_eq!(journal.iter().filter(|c| c.starts_with("mv ")).count(), 1);
    assert_eq!(journal.iter().filter(|c| c.starts_with("lvrename ")).count(), 2);
    assert_eq!(journal.iter().filter(|c| c.starts_with("zfs rename ")).count(), 1);
    assert!(journal.iter().all(|c| !c.starts_with("pvesr")));
    assert!(journal.contains(&"lvrename pve vm-100-disk-0 vm-200-disk-0".to_string()));
    assert!(journal.contains(&"zfs rename tank/guests/vm-100-disk-1 tank/guests/vm-200-disk-1".to_string()));

    let interfaces: Vec<&str> = report.disks.iter().map(|d| d.disk.interface.as_str()).collect();
    assert_eq!(interfaces, vec!["efidisk0", "scsi0", "scsi1"]);
    assert!(report.disks.iter().all(|d| d.succeeded()));

    // nothing mutating reached the executor
    let programs = exec.programs();
    assert!(programs.iter().all(|p| ["qm", "pvesr", "pvesh"].contains(&p.as_str())));
    assert_eq!(exec.called("pvesh", "set"), 0);
    assert!(cluster.guest_conf(100).exists());
    assert!(!cluster.guest_conf(200).exists());
}

#[test]
fn test_unknown_origin_fails_before_any_command() {
    let cluster = Cluster::new(VM_CONFIG);
    let exec = FakePve::new(&cluster, VM_CONFIG);
    let (result, journal) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 150, 200));

    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::GuestNotFound { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(exec.calls.borrow().is_empty());
    assert!(journal.is_empty());
}

#[test]
fn test_existing_target_is_rejected() {
    let cluster = Cluster::new(VM_CONFIG);
    fs::write(cluster.dir.path().join("nodes/pve2/lxc/200.conf"), "arch: amd64\n").unwrap();
    let exec = FakePve::new(&cluster, VM_CONFIG);
    let (result, _) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));

    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::GuestAlreadyExists { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(exec.calls.borrow().is_empty());
}

#[test]
fn test_failing_replication_blocks_the_change() {
    let cluster = Cluster::new(VM_CONFIG);
    let exec = FakePve::new(&cluster, VM_CONFIG);
    *exec.replication_state.borrow_mut() = Some("ERROR");
    let (result, journal) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));

    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::ReplicationInProgress { ref jobs, .. } if jobs[0].1 == "ERROR"));
    assert_eq!(err.exit_code(), 4);
    assert!(journal.is_empty());
    assert_eq!(exec.programs(), vec!["pvesr"]);
}

#[test]
fn test_unsupported_storage_fails_only_that_disk() {
    let config = "\
name: files
scsi0: local-lvm:vm-100-disk-0,size=32G
scsi1: nas:100/vm-100-disk-1.qcow2,size=16G
";
    let cluster = Cluster::new(config);
    let exec = FakePve::new(&cluster, config);
    let (result, _) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));
    let report = completed(result);

    assert_eq!(report.disks.len(), 2);
    let scsi0 = &report.disks[0];
    assert!(scsi0.succeeded());
    assert_eq!(scsi0.new_volume.as_deref(), Some("vm-200-disk-0"));
    let scsi1 = &report.disks[1];
    assert!(!scsi1.succeeded());
    assert!(scsi1.error.as_deref().unwrap().contains("unsupported type 'nfs'"));
    assert!(report.needs_followup());

    assert!(!cluster.guest_conf(100).exists());
    let moved = fs::read_to_string(cluster.guest_conf(200)).unwrap();
    assert!(moved.contains("scsi0: local-lvm:vm-200-disk-0,size=32G"));
    assert!(moved.contains("scsi1: nas:100/vm-100-disk-1.qcow2,size=16G"));
}

#[test]
fn test_replication_jobs_are_drained_and_recreated() {
    let cluster = Cluster::new(VM_CONFIG).with_replication(
        "local: 100-0\n\ttarget pve2\n\tschedule */15\n\tcomment offsite\n",
    );
    let mut exec = FakePve::new(&cluster, VM_CONFIG);
    exec.snapshot_config = Some(
        "scsi0: local-lvm:vm-100-disk-0,size=32G\nvmstate: local-lvm:vm-100-state-nightly\n"
            .to_string(),
    );
    *exec.replication_state.borrow_mut() = Some("OK");
    let (result, journal) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));
    let report = completed(result);

    assert!(!report.drain_timed_out);
    assert_eq!(exec.called("pvesr", "delete"), 1);
    assert!(journal
        .contains(&"pvesr create-local-job 200-0 pve2 --schedule */15 --comment offsite".to_string()));
    assert!(report.replication_failures.is_empty());

    let vmstate = report
        .disks
        .iter()
        .find(|d| d.disk.interface == "vmstate")
        .expect("snapshot memory state is reassigned");
    assert_eq!(vmstate.new_volume.as_deref(), Some("vm-200-state-nightly"));
    assert_eq!(report.disks.len(), 4);
}

#[test]
fn test_strict_drain_aborts_before_the_rename() {
    let cluster = Cluster::new(VM_CONFIG).with_replication("local: 100-0\n\ttarget pve2\n");
    let mut exec = FakePve::new(&cluster, VM_CONFIG);
    exec.drains = false;
    *exec.replication_state.borrow_mut() = Some("OK");
    let mut req = request(&cluster, 100, 200);
    req.drain_timeout = Duration::ZERO;
    req.drain_policy = DrainPolicy::Abort;

    let (result, _) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &req);
    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::ReplicationDrainTimeout { .. }));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(exec.called("pvesr", "delete"), 1);
    assert!(exec.programs().iter().all(|p| p != "mv"));
    assert!(cluster.guest_conf(100).exists());
}

#[test]
fn test_running_guest_is_refused() {
    let cluster = Cluster::new(VM_CONFIG);
    let mut exec = FakePve::new(&cluster, VM_CONFIG);
    exec.status = "running";
    let (result, journal) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));

    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::GuestNotStopped { ref state, .. } if state == "running"));
    assert_eq!(err.exit_code(), 3);
    assert!(journal.is_empty());
}

#[test]
fn test_declining_confirmation_changes_nothing() {
    let cluster = Cluster::new(VM_CONFIG);
    let exec = FakePve::new(&cluster, VM_CONFIG);
    let mut req = request(&cluster, 100, 200);
    req.assume_yes = false;

    let (result, journal) = run(&cluster, &exec, Mode::Apply, &Decline, &req);
    assert!(matches!(result, Ok(Outcome::Aborted)));
    assert!(journal.is_empty());
    assert!(cluster.guest_conf(100).exists());
}

#[test]
fn test_cancelled_token_interrupts() {
    let cluster = Cluster::new(VM_CONFIG);
    let exec = FakePve::new(&cluster, VM_CONFIG);
    let runner = Runner::new(&exec, Mode::Apply);
    let token = CancellationToken::new();
    token.cancel();

    let err = Reassigner::new(&cluster.settings, &runner, &AssumeYes, &token, "pve1")
        .run(&request(&cluster, 100, 200))
        .unwrap_err();
    assert!(matches!(err, ReassignError::Interrupted));
    assert_eq!(err.exit_code(), 130);
}

#[test]
fn test_guest_on_another_node_is_changed_over_ssh() {
    let cluster = Cluster::on_node("pve2", VM_CONFIG).with_replication("local: 100-0\n\ttarget pve3\n");
    let mut exec = FakePve::new(&cluster, VM_CONFIG);
    exec.failing = Some("zfs");
    *exec.replication_state.borrow_mut() = Some("OK");
    let (result, _) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));
    let report = completed(result);
    assert_eq!(report.host, "pve2");

    let prefix = ["ssh", "-o", "BatchMode=yes", "root@pve2"];
    let calls = exec.calls.borrow();
    let on_pve2 = |program: &str| {
        calls
            .iter()
            .any(|argv| argv.len() > 4 && argv[..4] == prefix && argv[4] == program)
    };
    for program in ["qm", "pvesr", "mv", "lvrename", "zfs"] {
        assert!(on_pve2(program), "{program} did not run on pve2");
    }
    assert_eq!(exec.called("pvesr", "create-local-job"), 1);
    assert!(report.replication_failures.is_empty());
    // storage and guest commands never run on this node
    assert!(calls
        .iter()
        .all(|argv| !["qm", "pvesr", "mv", "lvrename", "zfs"].contains(&argv[0].as_str())));
    // backup jobs are cluster wide and patched from here
    assert!(calls.iter().any(|argv| argv[0] == "pvesh"));

    // the remote zfs failure only fails that disk
    let scsi1 = report.disks.iter().find(|d| d.disk.interface == "scsi1").unwrap();
    let error = scsi1.error.as_deref().unwrap();
    assert!(error.contains("root@pve2") && error.contains("permission denied"), "{error}");
    assert_eq!(report.disks.iter().filter(|d| d.succeeded()).count(), 2);
    assert!(report.needs_followup());

    let moved = fs::read_to_string(cluster.guest_conf(200)).unwrap();
    assert!(moved.contains("scsi0: local-lvm:vm-200-disk-0,size=32G"));
    assert!(moved.contains("scsi1: tank:vm-100-disk-1,size=8G"));
}

#[test]
fn test_failed_config_move_stops_after_drain() {
    let cluster = Cluster::new(VM_CONFIG).with_replication("local: 100-0\n\ttarget pve2\n");
    let mut exec = FakePve::new(&cluster, VM_CONFIG);
    exec.failing = Some("mv");
    *exec.replication_state.borrow_mut() = Some("OK");
    let (result, _) = run(&cluster, &exec, Mode::Apply, &AssumeYes, &request(&cluster, 100, 200));

    let err = result.unwrap_err();
    assert!(matches!(err, ReassignError::Command(_)), "{err:?}");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(exec.called("pvesr", "delete"), 1);
    assert_eq!(exec.called("pvesr", "create-local-job"), 0);
    assert!(exec.programs().iter().all(|p| p != "lvrename" && p != "zfs"));
    assert!(cluster.guest_conf(100).exists());
}
