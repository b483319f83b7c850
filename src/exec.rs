//! Command execution on the local host or through a remote shell prefix
//!
//! Every external tool the reassignment touches goes through a [`Runner`].
//! Read-only commands always run; mutations are either applied or, in dry-run
//! mode, only logged. Both kinds are recorded in the runner's journal.

use crate::error::CommandError;
use crate::utils::system::resolve_tool;
use std::cell::RefCell;
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, info, trace};

/// A program and its arguments, independent of where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        write!(f, "{}", render(&argv))
    }
}

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Local,
    /// Run through `prefix` (e.g. `ssh root@pve2`) on `host`.
    Remote { host: String, prefix: Vec<String> },
}

impl Target {
    /// Remote target reached with `ssh [options] user@host`.
    pub fn ssh(program: &str, options: &[String], user: &str, host: &str) -> Self {
        let mut prefix = vec![program.to_string()];
        prefix.extend(options.iter().cloned());
        prefix.push(format!("{user}@{host}"));
        Target::Remote {
            host: host.to_string(),
            prefix,
        }
    }

    /// Full argument vector for `cmd` on this target.
    pub fn argv(&self, cmd: &HostCommand) -> Vec<String> {
        match self {
            Target::Local => {
                let mut argv = vec![cmd.program.clone()];
                argv.extend(cmd.args.iter().cloned());
                argv
            }
            // The remote shell re-splits its arguments, so quote them.
            Target::Remote { prefix, .. } => {
                let mut argv = prefix.clone();
                argv.push(shell_quote(&cmd.program));
                argv.extend(cmd.args.iter().map(|a| shell_quote(a)));
                argv
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => write!(f, "local host"),
            Target::Remote { host, .. } => write!(f, "{host}"),
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns a fully assembled argument vector.
pub trait Executor {
    fn execute(&self, argv: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command line",
            ));
        };
        let mut cmd = Command::new(resolve_tool(program));
        cmd.args(args);
        for var in [
            "LANG",
            "LC_CTYPE",
            "LC_NUMERIC",
            "LC_TIME",
            "LC_COLLATE",
            "LC_MONETARY",
            "LC_MESSAGES",
            "LC_ALL",
        ] {
            cmd.env_remove(var);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output()?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Whether mutations are executed or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    DryRun,
}

/// Dry-run aware front end to an [`Executor`].
pub struct Runner<'a> {
    executor: &'a dyn Executor,
    mode: Mode,
    journal: RefCell<Vec<String>>,
}

impl<'a> Runner<'a> {
    pub fn new(executor: &'a dyn Executor, mode: Mode) -> Self {
        Self {
            executor,
            mode,
            journal: RefCell::new(Vec::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == Mode::DryRun
    }

    /// Run a read-only command and return its output whatever the exit status.
    pub fn output(&self, cmd: &HostCommand, target: &Target) -> Result<CommandOutput, CommandError> {
        let argv = target.argv(cmd);
        let line = render(&argv);
        debug!("exec: {}", line);
        let output = self
            .executor
            .execute(&argv)
            .map_err(|source| CommandError::Spawn {
                command: line.clone(),
                source,
            })?;
        for out in output.stdout.lines() {
            trace!("{}", out);
        }
        Ok(output)
    }

    /// Run a read-only command, failing on a non-zero exit; returns stdout.
    pub fn query(&self, cmd: &HostCommand, target: &Target) -> Result<String, CommandError> {
        let output = self.output(cmd, target)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(failed(render(&target.argv(cmd)), output))
        }
    }

    /// Run a mutating command, or only log it in dry-run mode.
    pub fn apply(&self, cmd: &HostCommand, target: &Target) -> Result<(), CommandError> {
        let line = render(&target.argv(cmd));
        self.journal.borrow_mut().push(line.clone());
        if self.is_dry_run() {
            info!("[dry-run] {}", line);
            return Ok(());
        }
        let output = self.output(cmd, target)?;
        if output.success() {
            Ok(())
        } else {
            Err(failed(line, output))
        }
    }

    /// Perform an in-process mutation (file rewrite, ...) described by `description`.
    pub fn apply_local<E>(
        &self,
        description: impl Into<String>,
        action: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E> {
        let description = description.into();
        self.journal.borrow_mut().push(description.clone());
        if self.is_dry_run() {
            info!("[dry-run] {}", description);
            return Ok(());
        }
        debug!("{}", description);
        action()
    }

    /// Every mutation applied or planned so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

fn failed(command: String, output: CommandOutput) -> CommandError {
    CommandError::Failed {
        command,
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

fn render(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.is_empty() || a.chars().any(char::is_whitespace) {
                format!("'{a}'")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
