use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::relay::{run_relay_loop, RelayFactory};
use super::{DaemonError, DaemonState, DaemonStatus, Result};
use crate::serial::{DeviceOpener, DiagnosticsSink, LogSink, ScopedSerial, TeeChannel, TimeoutIo, IO_TIMEOUT};

/// Runs an entry point as an independently scheduled unit.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<()>;
}

/// Spawns detached, named OS threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner {
    stack_size: Option<usize>,
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_size(stack_size: usize) -> Self {
        Self { stack_size: Some(stack_size) }
    }
}

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<()> {
        let mut builder = thread::Builder::new().name(name.to_string());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(entry).map(|_| ())
    }
}

/// Builds the traffic sink for each daemon run
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn DiagnosticsSink> + Send + Sync>;

/// Start/stop/status state machine for the relay daemon.
///
/// Start and stop only record intent; the relay unit acknowledges through
/// `DaemonState::actually_running`. Maintenance commands are allowed only
/// while that flag is clear.
pub struct DaemonController {
    name: String,
    state: Arc<DaemonState>,
    opener: Arc<dyn DeviceOpener>,
    spawner: Arc<dyn TaskSpawner>,
    relay: RelayFactory,
    sink: SinkFactory,
    io_timeout: Duration,
}

impl DaemonController {
    pub fn new(
        name: impl Into<String>,
        opener: Arc<dyn DeviceOpener>,
        spawner: Arc<dyn TaskSpawner>,
        relay: RelayFactory,
    ) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(DaemonState::new()),
            opener,
            spawner,
            relay,
            sink: Arc::new(|| Box::new(LogSink) as Box<dyn DiagnosticsSink>),
            io_timeout: IO_TIMEOUT,
        }
    }

    pub fn with_sink(mut self, sink: SinkFactory) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Arc<DaemonState> {
        self.state.clone()
    }

    pub fn status(&self) -> DaemonStatus {
        self.state.snapshot()
    }

    /// Spawn the relay unit on `device_path`
    pub fn request_start(&self, device_path: &str) -> Result<()> {
        if self.state.actually_running() {
            return Err(DaemonError::AlreadyRunning(self.name.clone()));
        }

        let previous = self.state.set_requested_run(true);

        let unit = RelayUnit {
            name: self.name.clone(),
            device_path: device_path.to_string(),
            state: self.state.clone(),
            opener: self.opener.clone(),
            relay: self.relay.clone(),
            sink: self.sink.clone(),
            io_timeout: self.io_timeout,
        };

        if let Err(source) = self.spawner.spawn(&self.name, Box::new(move || unit.run())) {
            self.state.set_requested_run(previous);
            log::error!("task spawn for {} failed: {}", self.name, source);
            return Err(DaemonError::Spawn { name: self.name.clone(), source });
        }

        Ok(())
    }

    /// Ask the relay unit to stop. Returns without waiting for it.
    pub fn request_stop(&self) -> Result<()> {
        if !self.state.actually_running() {
            return Err(DaemonError::NotRunning(self.name.clone()));
        }
        self.state.set_requested_run(false);
        Ok(())
    }

    pub fn maintenance_allowed(&self) -> bool {
        !self.state.actually_running()
    }

    pub fn ensure_maintenance_allowed(&self) -> Result<()> {
        if self.maintenance_allowed() {
            Ok(())
        } else {
            Err(DaemonError::MaintenanceBlocked)
        }
    }
}

/// Everything the background unit needs, moved into its thread.
struct RelayUnit {
    name: String,
    device_path: String,
    state: Arc<DaemonState>,
    opener: Arc<dyn DeviceOpener>,
    relay: RelayFactory,
    sink: SinkFactory,
    io_timeout: Duration,
}

impl RelayUnit {
    fn run(self) {
        log::info!("{} starting...", self.name);

        let mut serial = match ScopedSerial::open_with(self.opener.as_ref(), &self.device_path) {
            Ok(serial) => serial,
            Err(e) => {
                log::error!("{}: {}", self.name, e);
                return;
            }
        };

        let mut relay = (self.relay)();
        let outcome = {
            let tee = TeeChannel::uart(&mut serial, (self.sink)());
            let mut link = TimeoutIo::with_timeout(tee, self.io_timeout);

            self.state.set_actually_running(true);
            log::info!("{} started.", self.name);

            run_relay_loop(&self.state, &mut link, relay.as_mut())
        };

        match outcome {
            Ok(iterations) => log::debug!("{} relay loop ended after {} iterations", self.name, iterations),
            Err(e) => log::error!("{} relay aborted: {}", self.name, e),
        }

        if let Err(e) = serial.close() {
            log::warn!("{}: releasing {} failed: {}", self.name, self.device_path, e);
        }
        drop(serial);

        self.state.set_actually_running(false);
        log::info!("{} stopped.", self.name);
    }
}
