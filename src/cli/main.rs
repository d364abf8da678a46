//! # ucas CLI
//!
//! Command-line interface of the universal CLI agent system. The CLI
//! resolves agents, mods, and teams through the layered configuration,
//! composes ACLI commands, launches them under a runner, and exposes the
//! filesystem mail system to agents and the user.
//!
//! ## Command structure
//!
//! ```bash
//! ucas [OPTIONS] <COMMAND>
//! ```
//!
//! Global options on every verb:
//!
//! - `--dry-run`: print the exact runner invocation instead of executing
//! - `--debug`: merge and resolution tracing
//! - `-v, --verbose` / `-q, --quiet`: logging verbosity
//!
//! ## Exit codes
//!
//! - **0**: success, or `mail check` with mail waiting
//! - **1**: recoverable failure, or `mail check` with no mail
//! - **2**: hard configuration error (parse failure, unknown entity,
//!   invalid runner, unknown model)
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `env_logger`; user-visible results go
//! to stdout. `RUST_LOG=ucas=debug` overrides the verbosity flags.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

mod mail_cli;
mod mods_cli;
mod run_cli;
mod team_cli;

use ucas::{Settings, Workspace};

use mail_cli::MailCli;
use mods_cli::LsModsCli;
use run_cli::RunCli;
use team_cli::{RunTeamCli, StatusCli, StopTeamCli};

/// Root CLI parser: global toggles plus the verb.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Logging verbosity control.
    ///
    /// Use `-q` for warnings only, default for info level, `-v` for
    /// debug, `-vv` for trace.
    #[clap(flatten)]
    logging: Verbosity<InfoLevel>,

    /// Preview runner invocations without executing anything.
    #[clap(long, global = true)]
    dry_run: bool,

    /// Trace configuration merging and entity resolution.
    #[clap(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    sub_command: SubCmds,
}

/// Available verbs.
#[derive(Subcommand, Debug)]
enum SubCmds {
    /// Resolve, merge, compose, and launch a single agent.
    #[clap(name = "run", display_order = 1)]
    Run(RunCli),

    /// Resolve a team definition and launch each member in order.
    #[clap(name = "run-team", display_order = 2)]
    RunTeam(RunTeamCli),

    /// Invoke the runner's stop surface for a team session.
    #[clap(name = "stop-team", display_order = 3)]
    StopTeam(StopTeamCli),

    /// Show live runner sessions for this project.
    #[clap(name = "status", display_order = 4)]
    Status(StatusCli),

    /// Enumerate entity directories across the configuration layers.
    #[clap(name = "ls-mods", display_order = 5)]
    LsMods(LsModsCli),

    /// The agent mail system: send, list, read, archive, check.
    #[clap(name = "mail", display_order = 6)]
    Mail(MailCli),
}

fn main() {
    let args = Cli::parse();

    let filter = args.logging.log_level_filter();
    let mut logging = get_logging(filter);
    logging.init();

    let settings = Settings {
        dry_run: args.dry_run,
        debug: args.debug,
        verbose: filter > log::LevelFilter::Info,
        quiet: filter < log::LevelFilter::Info,
    };

    std::process::exit(match run(args, settings) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    });
}

fn run(args: Cli, settings: Settings) -> ucas::Result<i32> {
    let ws = Workspace::discover(settings)?;

    match args.sub_command {
        SubCmds::Run(run_cli) => run_cli.run(&ws).map(|()| 0),
        SubCmds::RunTeam(team_cli) => team_cli.run(&ws).map(|()| 0),
        SubCmds::StopTeam(stop_cli) => stop_cli.run(&ws).map(|()| 0),
        SubCmds::Status(status_cli) => status_cli.run(&ws).map(|()| 0),
        SubCmds::LsMods(ls_cli) => ls_cli.run(&ws).map(|()| 0),
        SubCmds::Mail(mail_cli) => mail_cli.run(&ws),
    }
}

/// Configure env_logger: timestamps on, module paths off, scoped to this
/// crate unless `RUST_LOG` widens it.
fn get_logging(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();

    builder.filter(Some("ucas"), level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.format_timestamp_secs().format_module_path(false);

    builder
}

/// Strip the optional `+` prefix from mod arguments.
pub(crate) fn strip_mod_prefixes(mods: Vec<String>) -> Vec<String> {
    mods.into_iter()
        .map(|m| m.strip_prefix('+').map(str::to_string).unwrap_or(m))
        .collect()
}
