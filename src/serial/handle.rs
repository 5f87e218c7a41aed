use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{DeviceLock, RawChannel, Result, SerialError, BAUD_RATE, IO_TIMEOUT};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A serial device that can be configured for the modem link and released.
pub trait SerialDevice: RawChannel {
    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()>;
    fn enable_hardware_flow_control(&mut self) -> std::io::Result<()>;
    /// Give the device back to the system. Called at most once per device.
    fn release(&mut self) -> std::io::Result<()>;
}

/// Opens devices with system-level exclusivity.
pub trait DeviceOpener: Send + Sync {
    fn open_exclusive(&self, path: &str) -> Result<Box<dyn SerialDevice>>;
}

/// Owns one open, configured serial device. The device is released when the
/// handle is closed or dropped, whichever comes first.
pub struct ScopedSerial {
    path: String,
    device: Option<Box<dyn SerialDevice>>,
}

impl ScopedSerial {
    /// Open and configure a tty with the platform serial driver
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(&NativeOpener::default(), path)
    }

    pub fn open_with(opener: &dyn DeviceOpener, path: &str) -> Result<Self> {
        let device = opener.open_exclusive(path)?;
        let mut handle = Self {
            path: path.to_string(),
            device: Some(device),
        };

        if let Err(cause) = handle.configure() {
            log::error!("open_serial('{}'): {}", path, cause);
            // The configuration failure is what the caller sees; a failing
            // release is only logged.
            if let Err(cleanup) = handle.close() {
                log::warn!("Release of {} after failed configuration also failed: {}", path, cleanup);
            }
            return Err(cause);
        }

        log::debug!("Opened {} at {} baud with RTS/CTS", path, BAUD_RATE);
        Ok(handle)
    }

    fn configure(&mut self) -> Result<()> {
        let path = self.path.clone();
        let device = self.device()?;
        device
            .set_baud_rate(BAUD_RATE)
            .map_err(|source| SerialError::Configure { path: path.clone(), setting: "baud rate", source })?;
        device
            .enable_hardware_flow_control()
            .map_err(|source| SerialError::Configure { path, setting: "RTS/CTS flow control", source })?;
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Access the open device; fails once the handle is closed.
    pub fn device(&mut self) -> Result<&mut (dyn SerialDevice + 'static)> {
        self.device.as_deref_mut().ok_or(SerialError::Closed)
    }

    /// Release the device. Closing an already closed handle does nothing.
    pub fn close(&mut self) -> Result<()> {
        match self.device.take() {
            Some(mut device) => {
                log::debug!("Closing {}", self.path);
                device.release().map_err(SerialError::IoError)
            }
            None => Ok(()),
        }
    }
}

impl RawChannel for ScopedSerial {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        self.device().map_err(closed_io)?.wait_readable(timeout)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.device().map_err(closed_io)?.read_raw(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.device().map_err(closed_io)?.write_raw(buf)
    }
}

impl Drop for ScopedSerial {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to release {}: {}", self.path, e);
        }
    }
}

fn closed_io(_: SerialError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "serial device is closed")
}

#[cfg(unix)]
type NativePort = serialport::TTYPort;
#[cfg(windows)]
type NativePort = serialport::COMPort;

/// Opens ttys through the `serialport` crate.
///
/// Every open first takes an advisory [`DeviceLock`] in the lock directory
/// (the system temp directory unless configured), so two instances never
/// share a tty even when both run as root. On Unix the port is then put in
/// exclusive mode (TIOCEXCL), which keeps out unprivileged processes that do
/// not know about the lock file. COM ports are exclusive by nature on Windows.
#[derive(Debug, Clone)]
pub struct NativeOpener {
    lock_dir: PathBuf,
}

impl NativeOpener {
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self { lock_dir: lock_dir.into() }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }
}

impl Default for NativeOpener {
    fn default() -> Self {
        Self::with_lock_dir(std::env::temp_dir())
    }
}

impl DeviceOpener for NativeOpener {
    fn open_exclusive(&self, path: &str) -> Result<Box<dyn SerialDevice>> {
        let lock = DeviceLock::acquire(&self.lock_dir, path)?;

        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(IO_TIMEOUT)
            .open_native()
            .map_err(|e| SerialError::from_open(path, e))?;

        #[cfg(unix)]
        let port = {
            let mut port = port;
            port.set_exclusive(true)
                .map_err(|e| SerialError::from_open(path, e))?;
            port
        };

        Ok(Box::new(NativeSerial { port, lock: Some(lock) }))
    }
}

struct NativeSerial {
    port: NativePort,
    lock: Option<DeviceLock>,
}

impl RawChannel for NativeSerial {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.port.bytes_to_read()? > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.port.write(buf)?;
        self.port.flush()?;
        Ok(written)
    }
}

impl SerialDevice for NativeSerial {
    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()> {
        Ok(self.port.set_baud_rate(baud_rate)?)
    }

    fn enable_hardware_flow_control(&mut self) -> std::io::Result<()> {
        Ok(self.port.set_flow_control(FlowControl::Hardware)?)
    }

    fn release(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        let cleared = self.port.set_exclusive(false);
        #[cfg(not(unix))]
        let cleared: serialport::Result<()> = Ok(());

        // The lock goes even when clearing exclusivity failed
        self.lock = None;
        Ok(cleared?)
    }
}
