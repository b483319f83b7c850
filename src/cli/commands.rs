//! CLI command definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// pvetk CLI
#[derive(Parser, Debug)]
#[command(name = "pvetk", version, about = "Proxmox VE guest maintenance toolkit")]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "PVETK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging; with --verbose also logs raw command output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Report more about what is being done
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Change a guest's id, moving its disks, replication and backup jobs along
    ChangeId(ChangeIdArgs),

    /// Show where a guest's config lives
    Locate {
        /// Guest id
        id: String,
    },

    /// List VM and container ids on every cluster node
    List {
        /// Only show these ids
        ids: Vec<String>,
    },

    /// Generate man page
    ManPage,
}

#[derive(Args, Debug, Clone)]
pub struct ChangeIdArgs {
    /// User for commands run on other cluster nodes
    #[arg(long, short = 'l', default_value = "root")]
    pub remote_user: String,

    /// Current guest id (prompted for when missing or invalid)
    #[arg(long, short = 'i')]
    pub origin_id: Option<String>,

    /// New guest id (prompted for when missing or invalid)
    #[arg(long, short = 't')]
    pub target_id: Option<String>,

    /// Skip confirmation prompts
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Log mutating commands instead of running them
    #[arg(long, short = 'd')]
    pub dry_run: bool,

    /// Seconds to wait for replication to drain (overrides settings)
    #[arg(long)]
    pub drain_timeout: Option<u64>,

    /// Fail instead of continuing when replication does not drain in time
    #[arg(long)]
    pub strict_drain: bool,

    /// Write a JSON report of the run
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_change_id_flags() {
        let cli = Cli::parse_from([
            "pvetk", "change-id", "-i", "100", "-t", "200", "-y", "-d", "--debug",
        ]);
        assert!(cli.debug);
        let Cmd::ChangeId(args) = cli.cmd else {
            panic!("expected change-id");
        };
        assert_eq!(args.origin_id.as_deref(), Some("100"));
        assert_eq!(args.target_id.as_deref(), Some("200"));
        assert_eq!(args.remote_user, "root");
        assert!(args.yes && args.dry_run && !args.strict_drain);
    }
}
