//! Interactive monitoring session
//!
//! Connects with the configured source, prints every status change, and reads
//! operator commands from stdin until the session comes to rest.

use colored::Colorize;
use monitor_core::config::toml_config::load_config;
use monitor_core::config::{ControllerSettings, SessionConfig};
use monitor_core::error::{MonitorError, SessionError};
use monitor_core::processor::{ProcessorChain, RateLogger};
use monitor_core::session::{ConnectionStatus, SessionController, SessionHandle, StatusChange};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Events between throughput log lines
const RATE_LOG_INTERVAL: u64 = 1000;

/// A command typed by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Pause,
    Resume,
    Next,
    Stats,
    Status,
    Stop,
    Help,
}

impl FromStr for OperatorCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Ok(OperatorCommand::Pause),
            "resume" | "r" => Ok(OperatorCommand::Resume),
            "next" | "n" | "step" => Ok(OperatorCommand::Next),
            "stats" => Ok(OperatorCommand::Stats),
            "status" | "s" => Ok(OperatorCommand::Status),
            "stop" | "quit" | "q" | "disconnect" => Ok(OperatorCommand::Stop),
            "help" | "?" => Ok(OperatorCommand::Help),
            other => Err(format!("Unknown command '{}' (try 'help')", other)),
        }
    }
}

/// Run the run command
pub fn run_session(config_path: Option<&Path>, paused: bool) -> Result<(), MonitorError> {
    let file = load_config(config_path)?;
    let settings = file.controller_settings();
    let mut session = file.session;
    if paused {
        session.pause_at_start = true;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(monitor(session, settings))
}

async fn monitor(session: SessionConfig, settings: ControllerSettings) -> Result<(), MonitorError> {
    let handle = SessionController::new(settings)
        .with_processors(|_| ProcessorChain::new().with(RateLogger::new(RATE_LOG_INTERVAL)))
        .spawn();

    // Observers see every transition; the watch receiver only drives the loop
    handle.observe(print_status);
    let mut status = handle.subscribe();

    println!("Connecting to {} ({})", session.source, session.detector);
    handle.connect(session).await?;
    println!("Type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if status.borrow_and_update().status.is_terminal() {
                    break;
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<OperatorCommand>() {
                    Ok(command) => execute(&handle, command).await,
                    Err(message) => eprintln!("{}", message),
                },
                Ok(None) | Err(_) => {
                    debug!("Operator input closed, running until the session ends");
                    stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                let _ = handle.disconnect().await;
            }
        }
    }

    print_statistics(&handle);
    let last = handle.current();
    handle.shutdown().await?;

    if last.status == ConnectionStatus::Error {
        return Err(SessionError::Aborted {
            cause: last.cause.unwrap_or_else(|| "unknown error".to_string()),
        }
        .into());
    }
    Ok(())
}

async fn execute(handle: &SessionHandle, command: OperatorCommand) {
    let result = match command {
        OperatorCommand::Pause => handle.pause().await,
        OperatorCommand::Resume => handle.resume().await,
        OperatorCommand::Next => handle.step().await,
        OperatorCommand::Stop => handle.disconnect().await,
        OperatorCommand::Stats => {
            print_statistics(handle);
            Ok(())
        }
        OperatorCommand::Status => {
            print_status(&handle.current());
            Ok(())
        }
        OperatorCommand::Help => {
            println!("Commands: pause, resume, next, stats, status, stop");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "✗".red(), e);
    }
}

fn print_status(change: &StatusChange) {
    let label = change.status.to_string();
    let label = match change.status {
        ConnectionStatus::Connected => label.green().bold(),
        ConnectionStatus::Sleeping => label.yellow().bold(),
        ConnectionStatus::Error | ConnectionStatus::TimedOut => label.red().bold(),
        ConnectionStatus::Disconnected => label.bold(),
        _ => label.dimmed(),
    };

    match &change.cause {
        Some(cause) => println!("[{}] {}: {}", change.at.format("%H:%M:%S%.3f"), label, cause),
        None => println!("[{}] {}", change.at.format("%H:%M:%S%.3f"), label),
    }
}

fn print_statistics(handle: &SessionHandle) {
    let Some(stats) = handle.statistics() else {
        println!("No session statistics yet");
        return;
    };
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to format statistics: {}", e),
    }
    println!("Average rate: {:.1} Hz", stats.events_per_second());
}
