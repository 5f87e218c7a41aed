use std::sync::Arc;

use super::DaemonState;
use crate::serial::{BoundedChannel, ReadOutcome, Result};

/// Handles one incoming/outgoing message on the established link.
///
/// Each call must return within roughly one I/O timeout so the daemon can
/// observe a stop request.
pub trait MessageRelay: Send {
    fn process_one(&mut self, link: &mut dyn BoundedChannel) -> Result<()>;
}

/// Builds a fresh relay for every daemon run
pub type RelayFactory = Arc<dyn Fn() -> Box<dyn MessageRelay> + Send + Sync>;

/// Keep relaying while the operator wants the daemon to run.
///
/// Intent is checked once before every iteration. An I/O error ends the loop
/// and is returned; the number of completed iterations is returned otherwise.
pub fn run_relay_loop(
    state: &DaemonState,
    link: &mut dyn BoundedChannel,
    relay: &mut dyn MessageRelay,
) -> Result<u64> {
    let mut iterations = 0u64;
    while state.requested_run() {
        relay.process_one(link)?;
        iterations += 1;
    }
    Ok(iterations)
}

/// Minimal relay: drains whatever the modem sends and logs it.
#[derive(Debug)]
pub struct DrainRelay {
    buf: [u8; 64],
    bytes_seen: u64,
}

impl DrainRelay {
    pub fn new() -> Self {
        Self { buf: [0; 64], bytes_seen: 0 }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl Default for DrainRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRelay for DrainRelay {
    fn process_one(&mut self, link: &mut dyn BoundedChannel) -> Result<()> {
        match link.read(&mut self.buf)? {
            ReadOutcome::Data(n) if n > 0 => {
                self.bytes_seen += n as u64;
                log::debug!("relay: {} bytes \"{}\"", n, self.buf[..n].escape_ascii());
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialError;
    use std::collections::VecDeque;

    struct Script(VecDeque<Result<ReadOutcome>>);

    impl BoundedChannel for Script {
        fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
            match self.0.pop_front() {
                Some(Ok(ReadOutcome::Data(n))) => {
                    buf[..n].fill(b'x');
                    Ok(ReadOutcome::Data(n))
                }
                Some(other) => other,
                None => Ok(ReadOutcome::Timeout),
            }
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
    }

    /// Stops the daemon after a fixed number of messages
    struct Countdown<'a> {
        state: &'a DaemonState,
        left: u32,
    }

    impl MessageRelay for Countdown<'_> {
        fn process_one(&mut self, _link: &mut dyn BoundedChannel) -> Result<()> {
            self.left -= 1;
            if self.left == 0 {
                self.state.set_requested_run(false);
            }
            Ok(())
        }
    }

    #[test]
    fn test_loop_checks_intent_every_iteration() {
        let state = DaemonState::new();
        state.set_requested_run(true);
        let mut link = Script(VecDeque::new());
        let mut relay = Countdown { state: &state, left: 3 };
        assert_eq!(run_relay_loop(&state, &mut link, &mut relay).unwrap(), 3);
    }

    #[test]
    fn test_loop_does_not_run_without_intent() {
        let state = DaemonState::new();
        let mut link = Script(VecDeque::new());
        let mut relay = DrainRelay::new();
        assert_eq!(run_relay_loop(&state, &mut link, &mut relay).unwrap(), 0);
    }

    #[test]
    fn test_drain_relay_counts_and_stops_on_error() {
        let state = DaemonState::new();
        state.set_requested_run(true);
        let mut link = Script(VecDeque::from(vec![
            Ok(ReadOutcome::Data(5)),
            Ok(ReadOutcome::Timeout),
            Err(SerialError::IoError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))),
        ]));
        let mut relay = DrainRelay::new();
        let err = run_relay_loop(&state, &mut link, &mut relay).unwrap_err();
        assert!(matches!(err, SerialError::IoError(_)));
        assert_eq!(relay.bytes_seen(), 5);
    }
}
