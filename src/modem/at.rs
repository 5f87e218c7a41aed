use std::io::Write;

use crate::serial::{BoundedChannel, ReadOutcome, SerialError};

/// BL600 command lines end with a carriage return
pub const LINE_TERMINATOR: &str = "\r";

#[derive(Debug, thiserror::Error)]
pub enum AtError {
    #[error("Invalid AT command {0:?}: must be non-empty and free of line breaks")]
    InvalidCommand(String),

    #[error("Serial communication error: {0}")]
    Serial(#[from] SerialError),
}

/// A batch stopped at `index`; nothing after it was sent.
#[derive(Debug, thiserror::Error)]
#[error("AT command #{index} ({command:?}) failed: {source}")]
pub struct BatchError {
    pub index: usize,
    pub command: String,
    #[source]
    pub source: AtError,
}

pub type Result<T> = std::result::Result<T, AtError>;

/// Decides when a response is complete without waiting for the idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTerminator {
    /// BL600 status line: `\n00\r` for success, `\n01\t<code>\r` for an error
    StatusLine,
    /// Stop as soon as the response contains this pattern
    Contains(&'static [u8]),
    /// Only a full buffer or the idle timeout ends the response
    IdleOnly,
}

impl ResponseTerminator {
    pub fn is_complete(&self, response: &[u8]) -> bool {
        match self {
            ResponseTerminator::StatusLine => !matches!(ModemStatus::from_response(response), ModemStatus::Unterminated),
            ResponseTerminator::Contains(pattern) => find(response, pattern).is_some(),
            ResponseTerminator::IdleOnly => false,
        }
    }
}

/// Status reported by the modem at the end of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemStatus {
    Ok,
    Error(String),
    Unterminated,
}

impl ModemStatus {
    pub fn from_response(response: &[u8]) -> Self {
        if find(response, b"\n00\r").is_some() {
            return ModemStatus::Ok;
        }
        if let Some(pos) = find(response, b"\n01\t") {
            let rest = &response[pos + 4..];
            if let Some(end) = rest.iter().position(|&b| b == b'\r') {
                return ModemStatus::Error(String::from_utf8_lossy(&rest[..end]).into_owned());
            }
        }
        ModemStatus::Unterminated
    }
}

/// One executed command of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub index: usize,
    pub command: String,
    pub response: Vec<u8>,
}

impl CommandOutcome {
    pub fn status(&self) -> ModemStatus {
        ModemStatus::from_response(&self.response)
    }

    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }
}

/// Runs AT command exchanges over a bounded channel.
#[derive(Debug, Clone, Copy)]
pub struct AtExecutor {
    terminator: ResponseTerminator,
}

impl AtExecutor {
    pub fn new() -> Self {
        Self::with_terminator(ResponseTerminator::StatusLine)
    }

    pub fn with_terminator(terminator: ResponseTerminator) -> Self {
        Self { terminator }
    }

    /// Send `command` and collect its response into `buf`.
    ///
    /// Reading stops when `buf` is full, when a read attempt times out, or when
    /// the terminator is seen. Returns the response length; zero bytes is a
    /// valid response.
    pub fn execute_one<C: BoundedChannel + ?Sized>(
        &self,
        channel: &mut C,
        command: &str,
        mut trace: Option<&mut dyn Write>,
        buf: &mut [u8],
    ) -> Result<usize> {
        if command.is_empty() || command.contains(['\r', '\n']) {
            return Err(AtError::InvalidCommand(command.to_string()));
        }

        if let Some(out) = trace.as_deref_mut() {
            emit(out, format_args!("{}\n", command));
        }

        let line = format!("{}{}", command, LINE_TERMINATOR);
        channel.write_all(line.as_bytes())?;

        let mut filled = 0;
        while filled < buf.len() {
            match channel.read(&mut buf[filled..])? {
                ReadOutcome::Timeout | ReadOutcome::Data(0) => break,
                ReadOutcome::Data(n) => {
                    filled += n;
                    if self.terminator.is_complete(&buf[..filled]) {
                        break;
                    }
                }
            }
        }

        log::debug!("AT {:?} -> {} bytes", command, filled);
        if let Some(out) = trace.as_deref_mut() {
            emit(out, format_args!("{} bytes: \"{}\"\n", filled, buf[..filled].escape_ascii()));
        }

        Ok(filled)
    }

    /// Execute `commands` strictly in order, stopping at the first failure.
    pub fn execute_batch<C, S>(
        &self,
        channel: &mut C,
        commands: &[S],
        mut trace: Option<&mut dyn Write>,
        buf: &mut [u8],
    ) -> std::result::Result<Vec<CommandOutcome>, BatchError>
    where
        C: BoundedChannel + ?Sized,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::with_capacity(commands.len());

        for (index, command) in commands.iter().enumerate() {
            let command = command.as_ref();
            if let Some(out) = trace.as_mut() {
                emit(&mut **out, format_args!("{}# ", index));
            }

            // Reborrow per command; the trace outlives the whole batch
            let step_trace = trace.as_mut().map(|t| &mut **t as &mut dyn Write);
            let len = self
                .execute_one(channel, command, step_trace, buf)
                .map_err(|source| BatchError { index, command: command.to_string(), source })?;

            outcomes.push(CommandOutcome {
                index,
                command: command.to_string(),
                response: buf[..len].to_vec(),
            });
        }

        Ok(outcomes)
    }
}

impl Default for AtExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// Trace output is diagnostics only; a broken stdout must not fail the exchange.
fn emit(out: &mut dyn Write, args: std::fmt::Arguments<'_>) {
    if let Err(e) = out.write_fmt(args) {
        log::debug!("AT trace write failed: {}", e);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
