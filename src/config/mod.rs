use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::modem::firmware::{FirmwareVersion, MINIMUM_FIRMWARE};
use crate::modem::DEFAULT_RESPONSE_CAPACITY;

pub const DEFAULT_DAEMON_NAME: &str = "bl600";
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Sysfs GPIO that selects the modem's radio mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitchConfig {
    pub value_path: PathBuf,
    #[serde(default = "default_true")]
    pub at_mode_level_high: bool,
}

/// Bridge settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub daemon_name: String,
    pub io_timeout_ms: u64,
    pub response_capacity: usize,
    pub minimum_firmware: FirmwareVersion,
    pub stack_size: usize,
    /// Tee daemon UART traffic to stderr
    pub trace_traffic: bool,
    /// Append daemon UART traffic to this file instead
    pub traffic_log: Option<PathBuf>,
    pub mode_switch: Option<ModeSwitchConfig>,
    /// Directory for per-device lock files; the system temp directory when unset
    pub lock_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            daemon_name: DEFAULT_DAEMON_NAME.to_string(),
            io_timeout_ms: 1000,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            minimum_firmware: MINIMUM_FIRMWARE,
            stack_size: DEFAULT_STACK_SIZE,
            trace_traffic: true,
            traffic_log: None,
            mode_switch: None,
            lock_dir: None,
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daemon_name.trim().is_empty() {
            return Err(ConfigError::Invalid("daemon_name must not be empty".to_string()));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid("io_timeout_ms must be greater than zero".to_string()));
        }
        if self.response_capacity == 0 {
            return Err(ConfigError::Invalid("response_capacity must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}
