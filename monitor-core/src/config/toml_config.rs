//! TOML configuration file I/O
//!
//! Handles loading and saving monitoring settings to/from TOML files
//! in the user's configuration directory.

use crate::config::{ControllerSettings, DataSource, SessionConfig};
use crate::error::{ConfigError, MonitorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Complete TOML configuration structure
///
/// Contains the session settings and, optionally, controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorFile {
    pub session: SessionConfig,

    #[serde(default)]
    pub controller: Option<ControllerSettings>,
}

impl MonitorFile {
    pub fn new(session: SessionConfig, controller: Option<ControllerSettings>) -> Self {
        Self {
            session,
            controller,
        }
    }

    /// A starting configuration reading from a local EVIO file
    pub fn template() -> Self {
        Self::new(
            SessionConfig::new(
                DataSource::EvioFile {
                    path: PathBuf::from("run.evio"),
                },
                "HPS-PhysicsRun2016-Pass2",
            ),
            Some(ControllerSettings::default()),
        )
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, MonitorError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            },
            _ => ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            },
        })?;

        let file: MonitorFile = toml::from_str(&contents).map_err(|e| {
            ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            }
        })?;

        file.session.validate().map_err(|e| {
            warn!("Session configuration validation failed: {}", e);
            e
        })?;

        if let Some(ref controller) = file.controller {
            controller.validate()?;
            debug!(
                join_timeout_ms = controller.join_timeout_ms,
                connect_timeout_ms = controller.connect_timeout_ms,
                "Loaded controller settings"
            );
        } else {
            debug!("No controller settings in config, defaults will be used");
        }

        info!(
            source = %file.session.source,
            builder = %file.session.event_builder,
            detector = %file.session.detector,
            "Loaded session configuration"
        );

        Ok(file)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), MonitorError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        std::fs::write(path, contents).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file: {}", e),
        })?;

        Ok(())
    }

    /// Controller settings, or defaults if the file has none
    pub fn controller_settings(&self) -> ControllerSettings {
        self.controller.clone().unwrap_or_default()
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "session.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/hps-monitor, or HPS_MONITOR_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, MonitorError> {
    if let Ok(config_dir) = std::env::var("HPS_MONITOR_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| ConfigError::IoError {
        message: "HOME environment variable not set".to_string(),
    })?;

    Ok(PathBuf::from(home).join(".config").join("hps-monitor"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, MonitorError> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from an explicit path or the default location
pub fn load_config(path: Option<&Path>) -> Result<MonitorFile, MonitorError> {
    match path {
        Some(path) => MonitorFile::from_file(path),
        None => MonitorFile::from_file(&get_config_path()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EtConnectionParams, WaitMode};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("session.toml");

        let mut params = EtConnectionParams::new("clondaq6");
        params.wait_mode = WaitMode::Timed;
        params.wait_time_ms = Some(500);
        params.prescale = 10;
        let mut session = SessionConfig::new(DataSource::EtServer(params), "HPS-EngRun2015");
        session.disconnect_on_end_run = true;
        let file = MonitorFile::new(session, None);

        file.to_file(&path).unwrap();
        let loaded = MonitorFile::from_file(&path).unwrap();

        assert_eq!(loaded, file);
        assert_eq!(loaded.controller_settings(), ControllerSettings::default());
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = MonitorFile::from_file(&temp_dir.path().join("absent.toml"));
        assert!(matches!(
            result,
            Err(MonitorError::Config(ConfigError::LoadFailed { .. }))
        ));
    }

    #[test]
    fn test_template_is_valid() {
        let template = MonitorFile::template();
        assert!(template.session.validate().is_ok());
        assert!(template.controller_settings().validate().is_ok());
    }
}
