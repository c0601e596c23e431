//! lifeline: host bootstrap and crash report inspection.
//!
//! Runs a tracked host session against the shared lock directory, and inspects what
//! earlier sessions left behind.
//!
//! ## Subcommands
//!
//! - `run`: Full bootstrap (abrupt-exit recovery, session start, persistence, clean end)
//! - `exits`: Exit classification for every session with markers
//! - `sessions`: Recent session records from the database
//! - `crashes`: List crash reports; `show` and `issue` print one

mod crashes;
mod exits;
mod logging;
mod run;
mod sessions;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lifeline_core::{load_config, LifelineConfig, LifelineError};

#[derive(Parser)]
#[command(name = "lifeline")]
#[command(about = "Session lifecycle and crash attribution for desktop hosts")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/lifeline/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Lock directory holding markers, locks, logs, and crash reports
    #[arg(long, global = true, value_name = "DIR")]
    lock_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tracked host session
    Run(run::RunArgs),

    /// Show how each known session ended
    Exits {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List recent session records
    Sessions {
        /// Maximum number of sessions to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List crash reports, or print one
    Crashes {
        #[command(subcommand)]
        action: Option<crashes::CrashesCommand>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            let _logging_guard = logging::init(None);
            tracing::error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    let lock_dir = match resolve_lock_dir(&cli, &config) {
        Ok(dir) => dir,
        Err(e) => {
            let _logging_guard = logging::init(None);
            tracing::error!(error = %e, "No lock directory available");
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Run(args) => {
            let session_id = match run::resolve_session_id(args.session_id.clone()) {
                Ok(id) => id,
                Err(e) => {
                    let _logging_guard = logging::init(None);
                    tracing::error!(error = %e, "Invalid session id");
                    std::process::exit(1);
                }
            };
            let _logging_guard = logging::init(Some((&lock_dir, session_id.as_str())));
            if let Err(e) = run::run(args, &config, lock_dir, session_id) {
                tracing::error!(error = %e, "lifeline run failed");
                std::process::exit(1);
            }
        }
        Commands::Exits { json } => {
            let _logging_guard = logging::init(None);
            if let Err(e) = exits::run(&lock_dir, json) {
                tracing::error!(error = %e, "lifeline exits failed");
                std::process::exit(1);
            }
        }
        Commands::Sessions { limit } => {
            let _logging_guard = logging::init(None);
            if let Err(e) = sessions::run(&config, limit) {
                tracing::error!(error = %e, "lifeline sessions failed");
                std::process::exit(1);
            }
        }
        Commands::Crashes { action } => {
            let _logging_guard = logging::init(None);
            if let Err(e) = crashes::run(&lock_dir, action) {
                tracing::error!(error = %e, "lifeline crashes failed");
                std::process::exit(1);
            }
        }
    }
}

fn resolve_lock_dir(cli: &Cli, config: &LifelineConfig) -> Result<PathBuf, LifelineError> {
    cli.lock_dir
        .clone()
        .or_else(|| config.resolve_lock_dir())
        .ok_or(LifelineError::MissingLockDir)
}
