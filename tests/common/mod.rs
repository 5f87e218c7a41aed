#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bl600_mobile_lib::commands::Dispatcher;
use bl600_mobile_lib::config::BridgeConfig;
use bl600_mobile_lib::daemon::{DaemonController, MessageRelay, TaskSpawner, ThreadSpawner};
use bl600_mobile_lib::serial::{
    BoundedChannel, DeviceOpener, RawChannel, ReadOutcome, SerialDevice, SerialError,
};

/// Raw channel fed from a script of incoming chunks.
#[derive(Default)]
pub struct ScriptedChannel {
    pub incoming: VecDeque<io::Result<Vec<u8>>>,
    pub written: Vec<u8>,
    pub max_write: Option<usize>,
    pub wait_calls: usize,
    pub read_calls: usize,
}

impl ScriptedChannel {
    pub fn with_chunks(chunks: &[&[u8]]) -> Self {
        Self {
            incoming: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            ..Self::default()
        }
    }
}

impl RawChannel for ScriptedChannel {
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.wait_calls += 1;
        Ok(!self.incoming.is_empty())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_calls += 1;
        match self.incoming.pop_front() {
            Some(Ok(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.incoming.push_front(Ok(chunk[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// AT modem double: answers each CR-terminated command with the next scripted
/// response and counts how many commands reached it.
pub struct ScriptedModem {
    responses: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    line: Vec<u8>,
    pub commands: Vec<String>,
    /// Fail the write of the command with this 0-based index
    pub fail_at: Option<usize>,
}

impl ScriptedModem {
    pub fn new(responses: &[&[u8]]) -> Self {
        Self {
            responses: responses.iter().map(|r| r.to_vec()).collect(),
            pending: VecDeque::new(),
            line: Vec::new(),
            commands: Vec::new(),
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl BoundedChannel for ScriptedModem {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, SerialError> {
        if self.pending.is_empty() {
            return Ok(ReadOutcome::Timeout);
        }
        // Dribble the response a few bytes at a time like a slow UART
        let n = buf.len().min(self.pending.len()).min(5);
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(ReadOutcome::Data(n))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, SerialError> {
        if self.fail_at == Some(self.commands.len()) {
            return Err(SerialError::IoError(io::Error::new(io::ErrorKind::BrokenPipe, "modem unplugged")));
        }
        for &b in buf {
            if b == b'\r' {
                self.commands.push(String::from_utf8_lossy(&self.line).into_owned());
                self.line.clear();
                if let Some(response) = self.responses.pop_front() {
                    self.pending.extend(response);
                }
            } else {
                self.line.push(b);
            }
        }
        Ok(buf.len())
    }
}

/// What happened to the mock devices of one opener
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub opens: usize,
    pub releases: usize,
    pub held: bool,
    pub baud_rate: Option<u32>,
    pub flow_control: bool,
    pub written: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct MockBehaviour {
    pub fail_open: bool,
    pub fail_baud: Option<io::ErrorKind>,
    pub fail_flow: Option<io::ErrorKind>,
    pub fail_release: Option<io::ErrorKind>,
}

/// Opener whose devices enforce exclusivity between each other.
#[derive(Default, Clone)]
pub struct MockOpener {
    pub log: Arc<Mutex<DeviceLog>>,
    pub behaviour: MockBehaviour,
    pub responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl MockOpener {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self { behaviour, ..Self::default() }
    }

    pub fn with_response(self, response: &[u8]) -> Self {
        self.responses.lock().unwrap().push_back(response.to_vec());
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, DeviceLog> {
        self.log.lock().unwrap()
    }
}

impl DeviceOpener for MockOpener {
    fn open_exclusive(&self, path: &str) -> Result<Box<dyn SerialDevice>, SerialError> {
        let mut log = self.log.lock().unwrap();
        if self.behaviour.fail_open {
            return Err(SerialError::NotFound(path.to_string()));
        }
        if log.held {
            return Err(SerialError::Busy(path.to_string()));
        }
        log.opens += 1;
        log.held = true;
        Ok(Box::new(MockDevice {
            log: self.log.clone(),
            behaviour: self.behaviour.clone(),
            responses: self.responses.clone(),
            pending: VecDeque::new(),
        }))
    }
}

pub struct MockDevice {
    log: Arc<Mutex<DeviceLog>>,
    behaviour: MockBehaviour,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    pending: VecDeque<u8>,
}

impl RawChannel for MockDevice {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if self.pending.is_empty() {
            // Keep idle loops from spinning
            thread::sleep(timeout.min(Duration::from_millis(2)));
            return Ok(false);
        }
        Ok(true)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.lock().unwrap().written.extend_from_slice(buf);
        if buf.contains(&b'\r') {
            if let Some(response) = self.responses.lock().unwrap().pop_front() {
                self.pending.extend(response);
            }
        }
        Ok(buf.len())
    }
}

impl SerialDevice for MockDevice {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        if let Some(kind) = self.behaviour.fail_baud {
            return Err(io::Error::new(kind, "baud rate rejected"));
        }
        self.log.lock().unwrap().baud_rate = Some(baud_rate);
        Ok(())
    }

    fn enable_hardware_flow_control(&mut self) -> io::Result<()> {
        if let Some(kind) = self.behaviour.fail_flow {
            return Err(io::Error::new(kind, "RTS/CTS not supported"));
        }
        self.log.lock().unwrap().flow_control = true;
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.releases += 1;
        log.held = false;
        match self.behaviour.fail_release {
            Some(kind) => Err(io::Error::new(kind, "close failed")),
            None => Ok(()),
        }
    }
}

/// Thread spawner that counts how many units it started.
#[derive(Default, Clone)]
pub struct CountingSpawner {
    pub spawned: Arc<AtomicUsize>,
}

impl TaskSpawner for CountingSpawner {
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        ThreadSpawner::new().spawn(name, entry)
    }
}

pub struct FailingSpawner;

impl TaskSpawner for FailingSpawner {
    fn spawn(&self, _name: &str, _entry: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "no task slots"))
    }
}

/// Relay that only counts its iterations
pub struct CountingRelay {
    pub iterations: Arc<AtomicUsize>,
}

impl MessageRelay for CountingRelay {
    fn process_one(&mut self, link: &mut dyn BoundedChannel) -> Result<(), SerialError> {
        let mut buf = [0u8; 16];
        link.read(&mut buf)?;
        self.iterations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Dispatcher whose daemon and maintenance commands share `opener`
pub fn mock_dispatcher(opener: &MockOpener, io_timeout_ms: u64) -> Dispatcher {
    let config = BridgeConfig {
        io_timeout_ms,
        ..BridgeConfig::default()
    };
    let shared: Arc<dyn DeviceOpener> = Arc::new(opener.clone());
    let iterations = Arc::new(AtomicUsize::new(0));
    let daemon = DaemonController::new(
        config.daemon_name.clone(),
        shared.clone(),
        Arc::new(CountingSpawner::default()),
        Arc::new(move || Box::new(CountingRelay { iterations: iterations.clone() }) as Box<dyn MessageRelay>),
    )
    .with_io_timeout(config.io_timeout());

    Dispatcher::with_parts(config, daemon, shared, None)
}
