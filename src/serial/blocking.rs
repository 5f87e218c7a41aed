use std::io::ErrorKind;
use std::time::{Duration, Instant};

use super::{Result, SerialError, IO_TIMEOUT};

/// Byte-level access to an underlying channel (a tty, a tee, a test script).
///
/// Implementations may return partial reads and writes. `wait_readable` returns
/// `Ok(false)` when nothing arrived within `timeout`.
pub trait RawChannel: Send {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool>;
    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize>;
}

impl<C: RawChannel + ?Sized> RawChannel for &mut C {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_raw(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (**self).write_raw(buf)
    }
}

impl<C: RawChannel + ?Sized> RawChannel for Box<C> {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_raw(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (**self).write_raw(buf)
    }
}

/// Result of a bounded read. `Timeout` is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Timeout,
}

/// Read/write contract used by the AT executor and the relay loop.
pub trait BoundedChannel {
    /// Wait at most one timeout period, then perform a single read.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Single best-effort write; returns how many bytes the channel took.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Retry `write` until everything is sent.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(SerialError::WriteTimeout),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// Turns a raw channel into a bounded-wait channel with one fixed timeout.
pub struct TimeoutIo<C> {
    inner: C,
    timeout: Duration,
}

impl<C: RawChannel> TimeoutIo<C> {
    pub fn new(inner: C) -> Self {
        Self::with_timeout(inner, IO_TIMEOUT)
    }

    pub fn with_timeout(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Wait for readability until `deadline`. Interrupted waits resume with
    /// whatever budget is left, never with a fresh one.
    fn wait_until(&mut self, deadline: Instant) -> Result<bool> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inner.wait_readable(remaining) {
                Ok(ready) => return Ok(ready),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(SerialError::IoError(e)),
            }
        }
    }
}

impl<C: RawChannel> BoundedChannel for TimeoutIo<C> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let deadline = Instant::now() + self.timeout;
        if !self.wait_until(deadline)? {
            return Ok(ReadOutcome::Timeout);
        }

        loop {
            match self.inner.read_raw(buf) {
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Ok(ReadOutcome::Timeout);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(ReadOutcome::Timeout);
                }
                Err(e) => return Err(SerialError::IoError(e)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inner.write_raw(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Ok(0);
                    }
                }
                // Flow control held off by the modem (CTS low)
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(0);
                }
                Err(e) => return Err(SerialError::IoError(e)),
            }
        }
    }
}

impl<B: BoundedChannel + ?Sized> BoundedChannel for &mut B {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }
}
