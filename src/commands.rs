use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

use crate::config::BridgeConfig;
use crate::daemon::{DaemonController, DaemonError, DrainRelay, MessageRelay, SinkFactory, ThreadSpawner};
use crate::modem::{AtExecutor, BatchError, FirmwareError, FirmwareGate, FirmwareVersion, GpioModeSwitch, ModeSwitch, RadioMode};
use crate::serial::{DeviceOpener, DiagnosticsSink, FileSink, LogSink, NativeOpener, ScopedSerial, SerialError, TimeoutIo, WriterSink};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Control daemon for the BL600 BLE serial modem
#[derive(Debug, Parser)]
#[command(name = "bl600-mobile", version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// One console line: the same commands without the program name
#[derive(Debug, Parser)]
#[command(name = "bl600-mobile", no_binary_name = true, disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Spawn the relay daemon on a tty
    Start { tty: String },
    /// Ask the daemon to stop
    Stop,
    /// Report requested and actual run state
    Status,
    /// Switch the modem into AT or data mode
    Mode {
        #[arg(value_enum)]
        mode: RadioMode,
    },
    /// Run one or more AT commands, stopping at the first failure
    At {
        tty: String,
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        commands: Vec<String>,
    },
    /// Check that the modem firmware is recent enough
    FirmwareVersion { tty: String },
}

impl Command {
    /// Commands that need the serial device for themselves
    pub fn is_maintenance(&self) -> bool {
        matches!(self, Command::Mode { .. } | Command::At { .. } | Command::FirmwareVersion { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    At(#[from] BatchError),

    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    #[error("Upgrade required: modem firmware {reported} is older than {required}")]
    UpgradeRequired {
        required: FirmwareVersion,
        reported: FirmwareVersion,
    },

    #[error("Mode switch not configured")]
    ModeNotConfigured,

    #[error("Mode switch failed: {0}")]
    Mode(#[source] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[source] std::io::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Routes commands to the daemon controller or to one-shot maintenance work.
pub struct Dispatcher {
    config: BridgeConfig,
    daemon: DaemonController,
    opener: Arc<dyn DeviceOpener>,
    mode_switch: Mutex<Option<Box<dyn ModeSwitch>>>,
}

impl Dispatcher {
    /// Wire the production collaborators described by `config`
    pub fn new(config: BridgeConfig) -> Self {
        let native = match &config.lock_dir {
            Some(dir) => NativeOpener::with_lock_dir(dir),
            None => NativeOpener::default(),
        };
        let opener: Arc<dyn DeviceOpener> = Arc::new(native);
        let daemon = DaemonController::new(
            config.daemon_name.clone(),
            opener.clone(),
            Arc::new(ThreadSpawner::with_stack_size(config.stack_size)),
            Arc::new(|| Box::new(DrainRelay::new()) as Box<dyn MessageRelay>),
        )
        .with_sink(traffic_sink(&config))
        .with_io_timeout(config.io_timeout());

        let mode_switch = config.mode_switch.as_ref().map(|m| {
            Box::new(GpioModeSwitch::new(m.value_path.clone(), m.at_mode_level_high)) as Box<dyn ModeSwitch>
        });

        Self::with_parts(config, daemon, opener, mode_switch)
    }

    pub fn with_parts(
        config: BridgeConfig,
        daemon: DaemonController,
        opener: Arc<dyn DeviceOpener>,
        mode_switch: Option<Box<dyn ModeSwitch>>,
    ) -> Self {
        Self {
            config,
            daemon,
            opener,
            mode_switch: Mutex::new(mode_switch),
        }
    }

    pub fn daemon(&self) -> &DaemonController {
        &self.daemon
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn dispatch(&self, command: &Command, out: &mut dyn Write) -> Result<()> {
        // Policy check comes before any device access
        if command.is_maintenance() {
            self.daemon.ensure_maintenance_allowed()?;
        }

        match command {
            Command::Start { tty } => {
                self.daemon.request_start(tty)?;
                log::info!("{} start requested on {}", self.daemon.name(), tty);
            }
            Command::Stop => {
                self.daemon.request_stop()?;
                log::info!("{} stop requested", self.daemon.name());
            }
            Command::Status => {
                let report = self.daemon.status().report(self.daemon.name());
                out.write_all(report.as_bytes()).map_err(CommandError::Output)?;
            }
            Command::Mode { mode } => self.switch_mode(*mode, out)?,
            Command::At { tty, commands } => self.exec_all_at(tty, commands, out)?,
            Command::FirmwareVersion { tty } => self.check_firmware(tty, out)?,
        }

        Ok(())
    }

    fn switch_mode(&self, mode: RadioMode, out: &mut dyn Write) -> Result<()> {
        let mut guard = self.mode_switch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let switch = guard.as_mut().ok_or(CommandError::ModeNotConfigured)?;
        switch.apply(mode).map_err(CommandError::Mode)?;
        writeln!(out, "mode: {}", mode).map_err(CommandError::Output)
    }

    fn exec_all_at(&self, tty: &str, commands: &[String], out: &mut dyn Write) -> Result<()> {
        let mut serial = ScopedSerial::open_with(self.opener.as_ref(), tty)?;
        let mut buf = vec![0u8; self.config.response_capacity];

        let outcomes = {
            let mut link = TimeoutIo::with_timeout(&mut serial, self.config.io_timeout());
            AtExecutor::new().execute_batch(&mut link, commands, Some(&mut *out), &mut buf)?
        };
        serial.close()?;

        log::debug!("{} AT command(s) completed on {}", outcomes.len(), tty);
        Ok(())
    }

    fn check_firmware(&self, tty: &str, out: &mut dyn Write) -> Result<()> {
        let mut serial = ScopedSerial::open_with(self.opener.as_ref(), tty)?;
        let gate = FirmwareGate::new(self.config.minimum_firmware)
            .with_response_capacity(self.config.response_capacity);

        let check = {
            let mut link = TimeoutIo::with_timeout(&mut serial, self.config.io_timeout());
            gate.check(&mut link, Some(&mut *out))?
        };
        serial.close()?;

        writeln!(out, "required version: {}", check.required).map_err(CommandError::Output)?;
        writeln!(out, "module's version: {}", check.reported).map_err(CommandError::Output)?;

        if check.compatible {
            writeln!(out, "ready to work.").map_err(CommandError::Output)?;
            Ok(())
        } else {
            writeln!(out, "upgrade required.").map_err(CommandError::Output)?;
            Err(CommandError::UpgradeRequired {
                required: check.required,
                reported: check.reported,
            })
        }
    }
}

fn traffic_sink(config: &BridgeConfig) -> SinkFactory {
    match (&config.traffic_log, config.trace_traffic) {
        (Some(path), _) => {
            let path = path.clone();
            Arc::new(move || match FileSink::append(&path) {
                Ok(sink) => Box::new(sink) as Box<dyn DiagnosticsSink>,
                Err(e) => {
                    log::warn!("Cannot open traffic log {}: {}; logging traffic instead", path.display(), e);
                    Box::new(LogSink)
                }
            })
        }
        (None, true) => Arc::new(|| Box::new(WriterSink::stderr()) as Box<dyn DiagnosticsSink>),
        (None, false) => Arc::new(|| Box::new(LogSink) as Box<dyn DiagnosticsSink>),
    }
}
