//! pvetk - Proxmox VE guest maintenance library
//!
//! Locates guests across cluster nodes and changes a guest's id together with
//! its disks, replication jobs and backup job membership.

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod guest;
pub mod logging;
pub mod reassign;
pub mod replication;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use cli::commands::Cli;
pub use config::Settings;
pub use exec::{Executor, Mode, Runner, SystemExecutor, Target};
pub use guest::{GuestId, GuestKind, Locator};
pub use reassign::{Outcome, ReassignReport, ReassignRequest, Reassigner};

/// Library error type
pub type Result<T> = anyhow::Result<T>;
