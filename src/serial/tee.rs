use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::RawChannel;

pub const UART_READ_LABEL: &str = "uart read  ";
pub const UART_WRITE_LABEL: &str = "uart write ";

/// Receives a copy of every byte that crosses a teed channel.
pub trait DiagnosticsSink: Send {
    fn record(&mut self, label: &str, bytes: &[u8]);
}

impl<S: DiagnosticsSink + ?Sized> DiagnosticsSink for Box<S> {
    fn record(&mut self, label: &str, bytes: &[u8]) {
        (**self).record(label, bytes)
    }
}

/// Mirrors successful reads and writes of `inner` into a diagnostics sink.
/// Waiting, timeouts and failures pass through untouched.
pub struct TeeChannel<C, S> {
    inner: C,
    sink: S,
    read_label: &'static str,
    write_label: &'static str,
}

impl<C: RawChannel, S: DiagnosticsSink> TeeChannel<C, S> {
    pub fn new(inner: C, sink: S, read_label: &'static str, write_label: &'static str) -> Self {
        Self { inner, sink, read_label, write_label }
    }

    /// Tee with the daemon's UART labels.
    pub fn uart(inner: C, sink: S) -> Self {
        Self::new(inner, sink, UART_READ_LABEL, UART_WRITE_LABEL)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (C, S) {
        (self.inner, self.sink)
    }
}

impl<C: RawChannel, S: DiagnosticsSink> RawChannel for TeeChannel<C, S> {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        self.inner.wait_readable(timeout)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read_raw(buf)?;
        if n > 0 {
            self.sink.record(self.read_label, &buf[..n]);
        }
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write_raw(buf)?;
        if n > 0 {
            self.sink.record(self.write_label, &buf[..n]);
        }
        Ok(n)
    }
}

/// Writes `label` followed by the escaped bytes, one record per line.
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> DiagnosticsSink for WriterSink<W> {
    fn record(&mut self, label: &str, bytes: &[u8]) {
        let line = format!("{}{}\n", label, bytes.escape_ascii());
        if let Err(e) = self.writer.write_all(line.as_bytes()) {
            log::debug!("Diagnostics write dropped: {}", e);
        }
    }
}

/// Sends traffic to the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn record(&mut self, label: &str, bytes: &[u8]) {
        log::trace!("{}{}", label, hex::encode(bytes));
    }
}

/// Appends timestamped hex records to a traffic log file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn append(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl DiagnosticsSink for FileSink {
    fn record(&mut self, label: &str, bytes: &[u8]) {
        let line = format!(
            "{} {}{}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            label,
            hex::encode(bytes)
        );
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            log::warn!("Traffic log write failed: {}", e);
        }
    }
}
