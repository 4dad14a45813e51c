//! Core library for the hps-monitor online monitoring tool
//!
//! This crate provides the session lifecycle for online monitoring: the
//! connection status board, the event-processing worker and its pause gate,
//! the watchdog that turns a finished worker into a disconnect, and the
//! session controller that ties them together for an operator.

pub mod error;
pub mod types;

pub mod builder;
pub mod config;
pub mod processor;
pub mod session;
pub mod source;

use tracing_subscriber::filter::LevelFilter;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running as a service.
/// Otherwise logs to stderr with pretty formatting, so that stdout stays
/// reserved for operator-facing output.
pub fn init_logging(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(level)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr),
        )
        .with(level)
        .try_init()?;

    Ok(())
}
