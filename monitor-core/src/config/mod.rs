//! Configuration module
//!
//! Session settings chosen by the operator and controller-wide settings,
//! loaded from and saved to TOML files.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

/// Default event transport port
pub const DEFAULT_ET_PORT: u16 = 11111;

/// How a transport read waits for the next record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Block until a record arrives or the connection is closed
    #[default]
    Sleep,
    /// Block for at most `wait_time_ms`, then report an idle tick
    Timed,
    /// Poll without blocking
    Async,
}

/// Connection parameters for a live event transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtConnectionParams {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name of the transport buffer on the server
    #[serde(default = "default_buffer_name")]
    pub buffer_name: String,

    #[serde(default = "default_station_name")]
    pub station_name: String,

    #[serde(default = "default_station_position")]
    pub station_position: u32,

    #[serde(default)]
    pub wait_mode: WaitMode,

    /// Read timeout for [`WaitMode::Timed`]
    #[serde(default)]
    pub wait_time_ms: Option<u64>,

    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Records requested per read, used to size the read buffer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Keep every Nth record
    #[serde(default = "default_prescale")]
    pub prescale: u32,
}

fn default_port() -> u16 {
    DEFAULT_ET_PORT
}
fn default_buffer_name() -> String {
    "ETBuffer".to_string()
}
fn default_station_name() -> String {
    "MY_STATION".to_string()
}
fn default_station_position() -> u32 {
    1
}
fn default_queue_size() -> u32 {
    0
}
fn default_chunk_size() -> u32 {
    1
}
fn default_prescale() -> u32 {
    1
}

impl EtConnectionParams {
    /// Create parameters for a host with every other field at its default
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            buffer_name: default_buffer_name(),
            station_name: default_station_name(),
            station_position: default_station_position(),
            wait_mode: WaitMode::default(),
            wait_time_ms: None,
            queue_size: default_queue_size(),
            chunk_size: default_chunk_size(),
            prescale: default_prescale(),
        }
    }

    /// Read timeout implied by the wait mode
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.wait_mode {
            WaitMode::Timed => self.wait_time_ms.map(Duration::from_millis),
            WaitMode::Sleep | WaitMode::Async => None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(invalid("Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("Port cannot be zero"));
        }
        if self.station_name.is_empty() {
            return Err(invalid("Station name cannot be empty"));
        }
        if self.station_position == 0 {
            return Err(invalid("Station position must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("Chunk size cannot be zero"));
        }
        if self.prescale == 0 {
            return Err(invalid("Prescale cannot be zero"));
        }
        if self.wait_mode == WaitMode::Timed && !matches!(self.wait_time_ms, Some(t) if t > 0) {
            return Err(invalid("Timed wait mode requires a non-zero wait_time_ms"));
        }
        Ok(())
    }
}

/// Where a session reads its records from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// Live event transport server
    EtServer(EtConnectionParams),
    /// Sequential EVIO file
    EvioFile { path: PathBuf },
    /// Sequential LCIO file
    LcioFile { path: PathBuf },
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::EtServer(p) => {
                write!(f, "et://{}:{}/{}/{}", p.host, p.port, p.buffer_name, p.station_name)
            }
            DataSource::EvioFile { path } => write!(f, "evio:{}", path.display()),
            DataSource::LcioFile { path } => write!(f, "lcio:{}", path.display()),
        }
    }
}

/// Settings for one monitoring session
///
/// A snapshot taken when the operator connects; the session never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub source: DataSource,

    /// Identifier resolved through the builder registry
    #[serde(default = "default_event_builder")]
    pub event_builder: String,

    /// Detector name used for conditions
    pub detector: String,

    /// Run number to use instead of the one carried by events
    #[serde(default)]
    pub run_number: Option<u32>,

    /// Ignore run numbers from events once `run_number` is set
    #[serde(default)]
    pub freeze_conditions: bool,

    #[serde(default)]
    pub pause_at_start: bool,

    /// End the session on the first build or step error
    #[serde(default = "default_disconnect_on_error")]
    pub disconnect_on_error: bool,

    /// End the session after an end-of-run event
    #[serde(default)]
    pub disconnect_on_end_run: bool,

    #[serde(default)]
    pub max_events: Option<u64>,
}

fn default_event_builder() -> String {
    "raw".to_string()
}
fn default_disconnect_on_error() -> bool {
    true
}

impl SessionConfig {
    /// Create a session configuration with default processing policy
    pub fn new(source: DataSource, detector: impl Into<String>) -> Self {
        Self {
            source,
            event_builder: default_event_builder(),
            detector: detector.into(),
            run_number: None,
            freeze_conditions: false,
            pause_at_start: false,
            disconnect_on_error: default_disconnect_on_error(),
            disconnect_on_end_run: false,
            max_events: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.source {
            DataSource::EtServer(params) => params.validate()?,
            DataSource::EvioFile { path } | DataSource::LcioFile { path } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("File path cannot be empty"));
                }
            }
        }

        if self.event_builder.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "event_builder".to_string(),
            });
        }

        if self.detector.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "detector".to_string(),
            });
        }

        if self.freeze_conditions && self.run_number.is_none() {
            return Err(invalid("freeze_conditions requires run_number"));
        }

        if self.max_events == Some(0) {
            return Err(invalid("max_events cannot be zero"));
        }

        Ok(())
    }
}

/// Controller-wide settings that outlive individual sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// How long a disconnect waits for the worker before closing the source anyway
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,

    /// Upper bound on opening the data source
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_join_timeout() -> u64 {
    5000
}
fn default_connect_timeout() -> u64 {
    10_000
}

impl ControllerSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_timeout_ms == 0 {
            return Err(invalid("join_timeout_ms cannot be zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms cannot be zero"));
        }
        Ok(())
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}
