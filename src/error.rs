//! Error types for pvetk.
//!
//! Library modules return one of the typed errors below; the binary wraps
//! everything else in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

use crate::guest::types::GuestId;

/// An external command could not be run or reported failure.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {}", exit_label(.exit_code), .stderr.trim())]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors raised while locating guests or reading their configuration.
#[derive(Error, Debug)]
pub enum GuestError {
    #[error("guest {id} not found on any cluster node")]
    NotFound { id: GuestId },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed guest config line: {line:?}")]
    MalformedConfigLine { line: String },

    #[error("disk {label} has {} raw values, expected one: {raw_values:?}", .raw_values.len())]
    MalformedDiskConfig {
        label: String,
        raw_values: Vec<String>,
    },

    #[error("malformed snapshot listing line: {line:?}")]
    MalformedSnapshotLine { line: String },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Errors raised while resolving a storage backend or planning a rename.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage '{name}' is not defined in the storage config")]
    UnknownStorage { name: String },

    #[error("storage '{name}' has unsupported type '{kind}'")]
    UnsupportedStorageKind { name: String, kind: String },

    #[error("storage '{name}' ({kind}) has no '{attribute}' attribute")]
    MissingPathAttribute {
        name: String,
        kind: String,
        attribute: &'static str,
    },

    #[error("malformed storage config line: {line:?}")]
    MalformedStanza { line: String },

    #[error("cannot derive a guest id from volume '{volume}': {reason}")]
    MalformedVolumeName { volume: String, reason: &'static str },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single disk could not be moved to its new guest id.
#[derive(Error, Debug)]
pub enum DiskReassignError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("disk rename failed: {0}")]
    Command(#[from] CommandError),

    #[error("failed to rewrite guest config {path:?}: {source}")]
    ConfigPatch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while reading replication jobs.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("malformed replication config line: {line:?}")]
    MalformedJobLine { line: String },

    #[error("replication job {job} has no target")]
    MissingTarget { job: String },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the backup job collaborator.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unexpected backup job listing: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised while loading tool settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("settings file {path:?} does not exist")]
    Missing { path: PathBuf },

    #[error("failed to read settings {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Fatal outcomes of a guest id reassignment.
#[derive(Error, Debug)]
pub enum ReassignError {
    #[error("guest with origin id {id} does not exist")]
    GuestNotFound { id: GuestId },

    #[error("guest with target id {id} already exists")]
    GuestAlreadyExists { id: GuestId },

    #[error("guest {id} must be stopped (currently {state})")]
    GuestNotStopped { id: GuestId, state: String },

    #[error("replication for guest {id} is not healthy: {}", format_jobs(.jobs))]
    ReplicationInProgress {
        id: GuestId,
        jobs: Vec<(String, String)>,
    },

    #[error("replication for guest {id} did not drain within {timeout_secs}s")]
    ReplicationDrainTimeout { id: GuestId, timeout_secs: u64 },

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Guest(#[from] GuestError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to read operator input: {0}")]
    Prompt(#[source] std::io::Error),
}

fn format_jobs(jobs: &[(String, String)]) -> String {
    jobs.iter()
        .map(|(job, state)| format!("{job}={state}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReassignError {
    /// Ctrl-C at a prompt counts as an interrupt, anything else as a read error.
    pub fn from_prompt(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::Interrupted {
            ReassignError::Interrupted
        } else {
            ReassignError::Prompt(e)
        }
    }

    /// Process exit code reported to the operator.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReassignError::GuestAlreadyExists { .. } => 1,
            ReassignError::GuestNotFound { .. } => 2,
            ReassignError::GuestNotStopped { .. } => 3,
            ReassignError::ReplicationInProgress { .. }
            | ReassignError::ReplicationDrainTimeout { .. } => 4,
            ReassignError::Interrupted => 130,
            _ => 1,
        }
    }
}
