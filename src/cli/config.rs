//! Configuration commands
//!
//! `check` validates a configuration file without connecting; `init` writes a
//! starting file for the operator to edit.

use colored::Colorize;
use monitor_core::builder::BuilderRegistry;
use monitor_core::config::toml_config::{get_config_path, load_config, MonitorFile};
use monitor_core::error::{ConfigError, MonitorError, SessionError, SetupError};
use std::path::Path;

/// Run the check command
pub fn run_check(path: Option<&Path>) -> Result<(), MonitorError> {
    let file = load_config(path)?;
    let session = &file.session;

    let builders = BuilderRegistry::with_defaults();
    if !builders.contains(&session.event_builder) {
        println!(
            "{} Unknown event builder '{}' (available: {})",
            "✗".red(),
            session.event_builder,
            builders.identifiers().join(", ")
        );
        return Err(SessionError::Setup(SetupError::UnknownBuilder {
            id: session.event_builder.clone(),
        })
        .into());
    }

    let settings = file.controller_settings();
    println!("{} Configuration is valid", "✓".green());
    println!("  Source:          {}", session.source);
    println!("  Event builder:   {}", session.event_builder);
    println!("  Detector:        {}", session.detector);
    if let Some(run) = session.run_number {
        let frozen = if session.freeze_conditions { " (frozen)" } else { "" };
        println!("  Run number:      {}{}", run, frozen);
    }
    println!("  Pause at start:  {}", session.pause_at_start);
    println!("  Stop on error:   {}", session.disconnect_on_error);
    println!("  Stop on end run: {}", session.disconnect_on_end_run);
    if let Some(max) = session.max_events {
        println!("  Max events:      {}", max);
    }
    println!("  Join timeout:    {} ms", settings.join_timeout_ms);
    println!("  Connect timeout: {} ms", settings.connect_timeout_ms);

    Ok(())
}

/// Run the init command
pub fn run_init(path: Option<&Path>, force: bool) -> Result<(), MonitorError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    if path.exists() && !force {
        println!("{} {} already exists", "⚠".yellow(), path.display());
        return Err(ConfigError::ValidationError {
            message: "Configuration file already exists; use --force to overwrite".to_string(),
        }
        .into());
    }

    MonitorFile::template().to_file(&path)?;
    println!("{} Wrote {}", "✓".green(), path.display());
    println!("Edit the [session] table, then run: hps-monitor check");

    Ok(())
}
