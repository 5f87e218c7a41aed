pub mod controller;
pub mod relay;

pub use controller::{DaemonController, SinkFactory, TaskSpawner, ThreadSpawner};
pub use relay::{run_relay_loop, DrainRelay, MessageRelay, RelayFactory};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("{0} is NOT running")]
    NotRunning(String),

    #[error("Stop the daemon first")]
    MaintenanceBlocked,

    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Intent and acknowledgement flags shared by the controller and the relay unit.
///
/// `requested_run` is written only by the controller. `actually_running` is
/// written only by the relay unit: set after the device is open and
/// configured, cleared after it has been released. Stores are `Release` and
/// loads `Acquire`, so a reader that sees `actually_running` also sees the
/// device setup that preceded it.
#[derive(Debug, Default)]
pub struct DaemonState {
    requested_run: AtomicBool,
    actually_running: AtomicBool,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested_run(&self) -> bool {
        self.requested_run.load(Ordering::Acquire)
    }

    pub fn actually_running(&self) -> bool {
        self.actually_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_requested_run(&self, value: bool) -> bool {
        self.requested_run.swap(value, Ordering::AcqRel)
    }

    pub(crate) fn set_actually_running(&self, value: bool) {
        self.actually_running.store(value, Ordering::Release);
    }

    pub fn snapshot(&self) -> DaemonStatus {
        DaemonStatus {
            requested_run: self.requested_run(),
            actually_running: self.actually_running(),
        }
    }
}

/// Lifecycle phase derived from the two flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DaemonPhase {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub requested_run: bool,
    pub actually_running: bool,
}

impl DaemonStatus {
    pub fn phase(&self) -> DaemonPhase {
        match (self.requested_run, self.actually_running) {
            (false, false) => DaemonPhase::Stopped,
            (true, false) => DaemonPhase::Starting,
            (true, true) => DaemonPhase::Running,
            (false, true) => DaemonPhase::StopRequested,
        }
    }

    /// Operator-facing status lines for the daemon called `name`
    pub fn report(&self, name: &str) -> String {
        format!(
            "{} should{} run.\n{} is{} running.\n",
            name,
            if self.requested_run { "" } else { " NOT" },
            name,
            if self.actually_running { "" } else { " NOT" },
        )
    }
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DaemonPhase::Stopped => "stopped",
            DaemonPhase::Starting => "starting",
            DaemonPhase::Running => "running",
            DaemonPhase::StopRequested => "stop requested",
        };
        f.write_str(text)
    }
}
