pub mod at;
pub mod firmware;
pub mod mode;

pub use at::{AtError, AtExecutor, BatchError, CommandOutcome, ModemStatus, ResponseTerminator};
pub use firmware::{FirmwareCheck, FirmwareError, FirmwareGate, FirmwareVersion};
pub use mode::{GpioModeSwitch, ModeSwitch, RadioMode};

/// Response buffer size used for maintenance exchanges
pub const DEFAULT_RESPONSE_CAPACITY: usize = 32;
