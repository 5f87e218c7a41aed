pub mod blocking;
pub mod handle;
pub mod lock;
pub mod tee;

pub use blocking::{BoundedChannel, RawChannel, ReadOutcome, TimeoutIo};
pub use handle::{DeviceOpener, NativeOpener, ScopedSerial, SerialDevice};
pub use lock::DeviceLock;
pub use tee::{DiagnosticsSink, FileSink, LogSink, TeeChannel, WriterSink};

use std::path::PathBuf;
use std::time::Duration;

// BL600 UART parameters
pub const BAUD_RATE: u32 = 9600;
pub const IO_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device busy: {0} is held by another process")]
    Busy(String),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to configure {setting} on {path}: {source}")]
    Configure {
        path: String,
        setting: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial device is closed")]
    Closed,

    #[error("Write timed out: device accepted no data")]
    WriteTimeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// Classify a failed open so the operator can tell a bad path from a busy device.
    pub fn from_open(path: &str, source: serialport::Error) -> Self {
        match source.kind() {
            serialport::ErrorKind::NoDevice
            | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                SerialError::NotFound(path.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::ResourceBusy) => {
                SerialError::Busy(path.to_string())
            }
            _ => SerialError::Open { path: path.to_string(), source },
        }
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;
