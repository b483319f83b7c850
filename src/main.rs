use anyhow::{anyhow, Result};
use clap::Parser;
use pvetk::cli::prompt::{prompt_vmid, AssumeYes, Confirm, TerminalPrompt};
use pvetk::cli::{manpage, ChangeIdArgs, Cli, Cmd};
use pvetk::config::{load_settings, DrainPolicy, Settings};
use pvetk::error::{GuestError, ReassignError};
use pvetk::guest::validate_vmid;
use pvetk::utils::system::{local_hostname, CancellationToken};
use pvetk::{logging, Locator, Mode, Outcome, ReassignRequest, Reassigner, Runner, SystemExecutor};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.debug, cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: could not set up logging: {e:#}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if let Some(e) = e.downcast_ref::<ReassignError>() {
        return e.exit_code();
    }
    match e.downcast_ref::<GuestError>() {
        Some(GuestError::NotFound { .. }) => 2,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Cmd::ManPage = cli.cmd {
        return manpage::generate_man_page();
    }
    let settings = load_settings(cli.config.as_deref())?;
    match cli.cmd {
        Cmd::ChangeId(args) => change_id(args, &settings, cli.verbose),
        Cmd::Locate { id } => {
            let id = validate_vmid(&id).ok_or_else(|| anyhow!("invalid guest id: {id:?}"))?;
            let location = Locator::new(&settings.paths.nodes_dir).locate(id)?;
            println!(
                "{}\t{}\t{}\t{}",
                id,
                location.kind,
                location.host,
                location.config_path.display()
            );
            Ok(())
        }
        Cmd::List { ids } => {
            let filter = ids
                .iter()
                .map(|raw| validate_vmid(raw).ok_or_else(|| anyhow!("invalid guest id: {raw:?}")))
                .collect::<Result<Vec<_>>>()?;
            let inventory = Locator::new(&settings.paths.nodes_dir).list_all(&filter)?;
            for id in &inventory.vm {
                println!("vm\t{id}");
            }
            for id in &inventory.container {
                println!("ct\t{id}");
            }
            Ok(())
        }
        Cmd::ManPage => Ok(()),
    }
}

fn change_id(args: ChangeIdArgs, settings: &Settings, verbose: bool) -> Result<()> {
    let token = CancellationToken::with_interrupt_handler()?;
    let origin = prompt_vmid("origin", args.origin_id.as_deref(), &token)
        .map_err(ReassignError::from_prompt)?;
    let target = prompt_vmid("target", args.target_id.as_deref(), &token)
        .map_err(ReassignError::from_prompt)?;

    let mut request = ReassignRequest::new(origin, target, settings);
    request.remote_user = args.remote_user;
    request.assume_yes = args.yes;
    request.verbose = verbose;
    if let Some(secs) = args.drain_timeout {
        request.drain_timeout = Duration::from_secs(secs);
    }
    if args.strict_drain {
        request.drain_policy = DrainPolicy::Abort;
    }

    let executor = SystemExecutor;
    let mode = if args.dry_run { Mode::DryRun } else { Mode::Apply };
    let runner = Runner::new(&executor, mode);
    let terminal = TerminalPrompt::new(token.clone());
    let confirm: &dyn Confirm = if args.yes { &AssumeYes } else { &terminal };
    let reassigner = Reassigner::new(settings, &runner, confirm, &token, local_hostname()?);

    match reassigner.run(&request)? {
        Outcome::Aborted => Ok(()),
        Outcome::Completed(report) => {
            report.log_summary();
            if let Some(path) = args.report {
                report.write_json(&path)?;
                info!("Report written to {}", path.display());
            }
            Ok(())
        }
    }
}
