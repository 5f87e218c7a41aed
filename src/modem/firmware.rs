use std::fmt;
use std::io::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::at::{AtExecutor, BatchError};
use super::DEFAULT_RESPONSE_CAPACITY;
use crate::serial::BoundedChannel;

/// Interrogates the firmware build: the reply carries `10\t3\t<version>`
pub const FIRMWARE_QUERY: &str = "AT I 3";
pub const RESPONSE_PREFIX: &str = "10\t3\t";

/// Oldest firmware the relay protocol works with
pub const MINIMUM_FIRMWARE: FirmwareVersion = FirmwareVersion::new(1, 8, 88, 0);

const SEPARATORS: [char; 3] = ['.', '\r', '\n'];

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("Firmware query failed: {0}")]
    Query(#[from] BatchError),

    #[error("Unexpected response shape (no {prefix:?} record): {raw:?}", prefix = RESPONSE_PREFIX)]
    UnexpectedResponse { raw: String },

    #[error("Malformed version string: {raw:?}")]
    MalformedVersion { raw: String },
}

pub type Result<T> = std::result::Result<T, FirmwareError>;

/// Four-component modem firmware version (major.minor.patch.build)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion {
    major: u32,
    minor: u32,
    patch: u32,
    build: u32,
}

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self { major, minor, patch, build }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    pub fn build(&self) -> u32 {
        self.build
    }

    pub fn components(&self) -> [u32; 4] {
        [self.major, self.minor, self.patch, self.build]
    }

    /// Parse the text that follows the response prefix.
    ///
    /// Tokens are separated by `.`, CR or LF; empty tokens are skipped and
    /// anything after the fourth token is ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = || FirmwareError::MalformedVersion { raw: text.to_string() };

        let mut parts = [0u32; 4];
        let mut tokens = text.split(SEPARATORS).filter(|t| !t.is_empty());
        for slot in parts.iter_mut() {
            let token = tokens.next().ok_or_else(malformed)?;
            *slot = parse_component(token).ok_or_else(malformed)?;
        }

        let [major, minor, patch, build] = parts;
        Ok(Self::new(major, minor, patch, build))
    }

    pub fn meets_minimum(&self, minimum: &FirmwareVersion) -> bool {
        compare_le(minimum, self)
    }
}

/// True when `version` is not older than `min`.
///
/// Earlier components decide with a strict `<` and fall through on equality;
/// only the build number compares with `<=`.
pub fn compare_le(min: &FirmwareVersion, version: &FirmwareVersion) -> bool {
    min.major < version.major
        || (min.major == version.major
            && (min.minor < version.minor
                || (min.minor == version.minor
                    && (min.patch < version.patch
                        || (min.patch == version.patch && min.build <= version.build)))))
}

// Numeric conventions of strtoul with base 0: leading whitespace and a `+`
// sign are skipped, then 0x.. is hex and a leading 0 octal. A `-` sign and
// values beyond u32 are rejected rather than wrapped.
fn parse_component(token: &str) -> Option<u32> {
    let token = token.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
    let token = token.strip_prefix('+').unwrap_or(token);
    let (digits, radix) = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        (hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

impl FromStr for FirmwareVersion {
    type Err = FirmwareError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = FirmwareError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FirmwareVersion> for String {
    fn from(version: FirmwareVersion) -> Self {
        version.to_string()
    }
}

/// Return the version text that follows the `10\t3\t` record prefix.
pub fn locate_version(response: &str) -> Result<&str> {
    response
        .find(RESPONSE_PREFIX)
        .map(|pos| &response[pos + RESPONSE_PREFIX.len()..])
        .ok_or_else(|| FirmwareError::UnexpectedResponse { raw: response.to_string() })
}

/// Outcome of a completed firmware check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareCheck {
    pub required: FirmwareVersion,
    pub reported: FirmwareVersion,
    pub compatible: bool,
}

/// Query, locate/parse, compare. Each stage runs only if the previous one succeeded.
#[derive(Debug, Clone)]
pub struct FirmwareGate {
    minimum: FirmwareVersion,
    executor: AtExecutor,
    response_capacity: usize,
}

impl FirmwareGate {
    pub fn new(minimum: FirmwareVersion) -> Self {
        Self {
            minimum,
            executor: AtExecutor::new(),
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
        }
    }

    pub fn with_response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = capacity;
        self
    }

    pub fn minimum(&self) -> FirmwareVersion {
        self.minimum
    }

    pub fn check<C: BoundedChannel + ?Sized>(
        &self,
        channel: &mut C,
        trace: Option<&mut dyn Write>,
    ) -> Result<FirmwareCheck> {
        let mut buf = vec![0u8; self.response_capacity];
        let outcomes = self
            .executor
            .execute_batch(channel, &[FIRMWARE_QUERY], trace, &mut buf)?;
        let response = outcomes.into_iter().next().map(|o| o.response).unwrap_or_default();
        self.evaluate(&response)
    }

    /// Run the locate/parse and compare stages on a captured response.
    pub fn evaluate(&self, response: &[u8]) -> Result<FirmwareCheck> {
        let text = String::from_utf8_lossy(response);
        let version_text = locate_version(&text)?;
        log::debug!("version string: {}", version_text.escape_debug());

        let reported = FirmwareVersion::parse(version_text)?;
        let compatible = reported.meets_minimum(&self.minimum);
        if !compatible {
            log::warn!("Modem firmware {} is older than required {}", reported, self.minimum);
        }

        Ok(FirmwareCheck {
            required: self.minimum,
            reported,
            compatible,
        })
    }
}

impl Default for FirmwareGate {
    fn default() -> Self {
        Self::new(MINIMUM_FIRMWARE)
    }
}
