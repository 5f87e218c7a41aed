use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Radio mode of the modem: interpreting AT commands, or passing data through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RadioMode {
    At,
    #[value(name = "default")]
    #[serde(rename = "default")]
    Data,
}

impl RadioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioMode::At => "at",
            RadioMode::Data => "default",
        }
    }
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RadioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "at" => Ok(RadioMode::At),
            "default" | "data" => Ok(RadioMode::Data),
            other => Err(format!("Unknown radio mode: {}", other)),
        }
    }
}

/// The two mode-switch capabilities of the modem board.
pub trait ModeSwitch: Send {
    fn enter_at_mode(&mut self) -> std::io::Result<()>;
    fn enter_data_mode(&mut self) -> std::io::Result<()>;

    fn apply(&mut self, mode: RadioMode) -> std::io::Result<()> {
        match mode {
            RadioMode::At => self.enter_at_mode(),
            RadioMode::Data => self.enter_data_mode(),
        }
    }
}

/// Drives the modem's mode pin through a sysfs GPIO `value` file.
#[derive(Debug, Clone)]
pub struct GpioModeSwitch {
    value_path: PathBuf,
    at_mode_level_high: bool,
}

impl GpioModeSwitch {
    pub fn new(value_path: impl Into<PathBuf>, at_mode_level_high: bool) -> Self {
        Self {
            value_path: value_path.into(),
            at_mode_level_high,
        }
    }

    fn drive(&self, high: bool) -> std::io::Result<()> {
        log::debug!("Mode pin {} <- {}", self.value_path.display(), high as u8);
        std::fs::write(&self.value_path, if high { "1" } else { "0" })
    }
}

impl ModeSwitch for GpioModeSwitch {
    fn enter_at_mode(&mut self) -> std::io::Result<()> {
        self.drive(self.at_mode_level_high)
    }

    fn enter_data_mode(&mut self) -> std::io::Result<()> {
        self.drive(!self.at_mode_level_high)
    }
}
