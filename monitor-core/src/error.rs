//! Error types for the monitoring core
//!
//! Errors raised on the caller's stack (configuration, session setup, control
//! commands) are returned as `Result`s. Errors raised inside the event
//! processing worker are recorded as [`ProcessingError`]s and surfaced through
//! statistics and status notifications instead.

use crate::session::status::ConnectionStatus;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the monitoring application
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to session control
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Failures while bringing a session up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Unknown event builder: {id}")]
    UnknownBuilder { id: String },

    #[error("Data source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Session setup timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Failed to start event processing: {reason}")]
    WorkerSpawn { reason: String },
}

/// An event builder could not structure a raw record
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("record {record}: {reason}")]
pub struct BuildError {
    /// Identity of the offending record within its source
    pub record: u64,
    pub reason: String,
}

impl BuildError {
    pub fn new(record: u64, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

/// A processor step failed on an event
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("step '{step}' failed on record {record}: {reason}")]
pub struct StepError {
    pub step: String,
    pub record: u64,
    pub reason: String,
}

/// Errors recorded by the event processing worker
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingError {
    #[error("Event build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Processing step failed: {0}")]
    Step(#[from] StepError),

    #[error("Data source read failed: {reason}")]
    Source { reason: String },

    #[error("Event processing worker panicked: {reason}")]
    WorkerPanicked { reason: String },
}

/// Errors returned by the session control surface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A session is already active (status: {status})")]
    AlreadyActive { status: ConnectionStatus },

    #[error("No connected session (status: {status})")]
    NotConnected { status: ConnectionStatus },

    #[error("Event processing is not paused")]
    NotPaused,

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Session setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Session ended with error: {cause}")]
    Aborted { cause: String },

    #[error("Session controller is no longer running")]
    ControllerStopped,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;
