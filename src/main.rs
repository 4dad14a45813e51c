//! hps-monitor - online data-monitoring front end
//!
//! Connects to a live or file-based event source, runs the processing chain,
//! and lets the operator pause, step through and stop the session from the
//! terminal.

use clap::{Parser, Subcommand};
use monitor_core::error::{MonitorError, SessionError, SetupError};
use monitor_core::init_logging;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

mod cli;

#[derive(Parser)]
#[command(name = "hps-monitor")]
#[command(about = "Online monitoring session control for detector event streams")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and process events, reading operator commands from stdin
    Run {
        /// Configuration file (default: ~/.config/hps-monitor/session.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start paused regardless of the configuration
        #[arg(long)]
        paused: bool,
    },
    /// Validate a configuration file without connecting
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a starting configuration file
    Init {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn log_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn exit_code(error: &MonitorError) -> i32 {
    match error {
        // Configuration errors (exit code 2)
        MonitorError::Config(_) | MonitorError::Toml(_) | MonitorError::TomlSerialize(_) => 2,
        MonitorError::Session(session_error) => match session_error {
            SessionError::InvalidConfig(_) => 2,
            SessionError::Setup(SetupError::UnknownBuilder { .. }) => 2,
            SessionError::AlreadyActive { .. }
            | SessionError::NotConnected { .. }
            | SessionError::NotPaused
            | SessionError::Setup(_)
            | SessionError::Aborted { .. }
            | SessionError::ControllerStopped => 1,
        },
        // IO errors (exit code 1 - runtime)
        MonitorError::Io(_) => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(log_level(cli.verbose, cli.quiet)) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let result = match cli.command {
        Commands::Run { config, paused } => cli::run::run_session(config.as_deref(), paused),
        Commands::Check { config } => cli::config::run_check(config.as_deref()),
        Commands::Init { config, force } => cli::config::run_init(config.as_deref(), force),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(exit_code(&e));
        }
    }
}
