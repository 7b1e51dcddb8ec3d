//! pgprofile - PostgreSQL performance snapshot and report.
//!
//! Usage:
//!   pgprofile                          # collect and write a report
//!   pgprofile -c pgprofile.toml run    # same, with a config file
//!   pgprofile collect                  # collect raw data only
//!   pgprofile report                   # report from the latest persisted run
//!   pgprofile report --run 20250601_080000
//!   pgprofile runs                     # list persisted runs

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgprofile::collector::PgConnector;
use pgprofile::config::Settings;
use pgprofile::model::{format_run_tag, parse_run_tag};
use pgprofile::pipeline::{self, ExitStatus};

/// Collects PostgreSQL diagnostics and renders a performance report.
#[derive(Parser)]
#[command(name = "pgprofile", about = "PostgreSQL performance snapshot and report", version)]
struct Args {
    /// TOML configuration file. Without it only PG* environment
    /// variables and defaults are used.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for raw-data CSV files (overrides the config file).
    #[arg(long, value_name = "DIR")]
    raw_dir: Option<PathBuf>,

    /// Directory for reports (overrides the config file).
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Collect, persist and report (default).
    Run,
    /// Collect and persist raw data without writing a report.
    Collect,
    /// Rebuild a report from persisted raw data.
    Report {
        /// Run timestamp (YYYYmmdd_HHMMSS, UTC). Defaults to the latest run.
        #[arg(long, value_name = "TAG")]
        run: Option<String>,
    },
    /// List persisted runs.
    Runs,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("pgprofile={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(ExitStatus::Failure.code());
        }
    };
    if let Some(dir) = args.raw_dir {
        settings.collection.raw_dir = dir;
    }
    if let Some(dir) = args.report_dir {
        settings.collection.report_dir = dir;
    }

    let status = execute(args.command.unwrap_or(Command::Run), &settings);
    std::process::exit(status.code());
}

fn execute(command: Command, settings: &Settings) -> ExitStatus {
    match command {
        Command::Run => match pipeline::run(settings, PgConnector) {
            Ok(outcome) => {
                for failure in &outcome.failures {
                    warn!(query = %failure.query_id, "no data collected: {}", failure.error);
                }
                if let Some(path) = &outcome.report {
                    println!("{}", path.display());
                }
                if let Some(e) = &outcome.persist_error {
                    error!("Raw data not persisted: {}", e);
                }
                outcome.status()
            }
            Err(e) => {
                error!("{}", e);
                ExitStatus::Failure
            }
        },
        Command::Collect => match pipeline::collect_only(settings, PgConnector) {
            Ok(run) if run.persist_error.is_none() && !run.datasets.is_empty() => {
                info!(
                    run = %format_run_tag(run.collected_at),
                    files = run.persisted.len(),
                    "raw data persisted"
                );
                ExitStatus::Success
            }
            Ok(_) => ExitStatus::Failure,
            Err(e) => {
                error!("{}", e);
                ExitStatus::Failure
            }
        },
        Command::Report { run } => {
            let run = match run.as_deref().map(parse_run_tag) {
                None => None,
                Some(Some(ts)) => Some(ts),
                Some(None) => {
                    error!("Invalid run timestamp, expected YYYYmmdd_HHMMSS");
                    return ExitStatus::Failure;
                }
            };
            match pipeline::report_from_store(settings, run) {
                Ok(path) => {
                    println!("{}", path.display());
                    ExitStatus::Success
                }
                Err(e) => {
                    error!("{}", e);
                    ExitStatus::Failure
                }
            }
        }
        Command::Runs => match pipeline::list_runs(settings) {
            Ok(runs) => {
                for ts in runs {
                    println!("{}", format_run_tag(ts));
                }
                ExitStatus::Success
            }
            Err(e) => {
                error!("{}", e);
                ExitStatus::Failure
            }
        },
    }
}
