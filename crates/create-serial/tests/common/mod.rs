//! Shared fixtures for driver integration tests: an in-memory serial device
//! and recording decoders.

#![allow(dead_code)]

use create_serial::{
    ConnectError, DriverConfig, FrameDecoder, OpenPort, PortOpener, PortReader, PortSettings,
    PortWriter, SerialDriver, Verdict,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FAKE_PORT: &str = "/dev/fake-create";

/// Install a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Driver config with a short poll interval so shutdown is quick.
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        read_poll_interval_ms: 5,
        ..Default::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// ============================================================================
// Fake Device
// ============================================================================

/// What the fake device delivers on its next read.
#[derive(Debug)]
pub enum Inbound {
    Byte(u8),
    Fail(io::ErrorKind),
}

/// Observable state of the fake device, shared with the test body.
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub written: Mutex<Vec<u8>>,
    pub rts: Mutex<Vec<bool>>,
    pub dtr: Mutex<Vec<bool>>,
    pub opens: AtomicUsize,
    pub reads_in_flight: AtomicUsize,
    pub max_reads_in_flight: AtomicUsize,
    pub halves_alive: AtomicUsize,
}

/// Test-side handle: feed bytes in, inspect what the driver did.
#[derive(Clone)]
pub struct FakeDevice {
    inbound: Sender<Inbound>,
    receiver: Receiver<Inbound>,
    pub log: Arc<DeviceLog>,
    fail_open: Arc<Mutex<VecDeque<ConnectError>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let (inbound, receiver) = crossbeam_channel::unbounded();
        FakeDevice {
            inbound,
            receiver,
            log: Arc::new(DeviceLog::default()),
            fail_open: Arc::new(Mutex::new(VecDeque::new())),
            fail_writes: Arc::new(Mutex::new(false)),
        }
    }

    /// Opener handing out halves of this device.
    pub fn opener(&self) -> FakeOpener {
        FakeOpener {
            device: self.clone(),
        }
    }

    pub fn feed(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.inbound
                .send(Inbound::Byte(byte))
                .expect("fake device channel closed");
        }
    }

    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.inbound
            .send(Inbound::Fail(kind))
            .expect("fake device channel closed");
    }

    pub fn fail_next_open(&self, err: ConnectError) {
        self.fail_open.lock().push_back(err);
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn written(&self) -> Vec<u8> {
        self.log.written.lock().clone()
    }

    /// Bytes fed but not yet read by the driver.
    pub fn unread(&self) -> usize {
        self.receiver.len()
    }

    pub fn halves_alive(&self) -> usize {
        self.log.halves_alive.load(Ordering::SeqCst)
    }
}

pub struct FakeOpener {
    device: FakeDevice,
}

impl PortOpener for FakeOpener {
    fn open(&self, settings: &PortSettings) -> Result<OpenPort, ConnectError> {
        if let Some(err) = self.device.fail_open.lock().pop_front() {
            return Err(err);
        }
        if settings.name != FAKE_PORT {
            return Err(ConnectError::DeviceNotFound {
                port: settings.name.clone(),
            });
        }
        let log = self.device.log.clone();
        log.opens.fetch_add(1, Ordering::SeqCst);
        log.halves_alive.fetch_add(2, Ordering::SeqCst);
        Ok(OpenPort {
            reader: Box::new(FakeReader {
                receiver: self.device.receiver.clone(),
                poll: settings.read_poll_interval,
                log: log.clone(),
            }),
            writer: Box::new(FakeWriter {
                log,
                fail_writes: self.device.fail_writes.clone(),
            }),
        })
    }
}

struct FakeReader {
    receiver: Receiver<Inbound>,
    poll: Duration,
    log: Arc<DeviceLog>,
}

impl PortReader for FakeReader {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let in_flight = self.log.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log
            .max_reads_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let result = match self.receiver.recv_timeout(self.poll) {
            Ok(Inbound::Byte(byte)) => Ok(Some(byte)),
            Ok(Inbound::Fail(kind)) => Err(io::Error::new(kind, "injected read failure")),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))
            }
        };
        self.log.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.log.halves_alive.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeWriter {
    log: Arc<DeviceLog>,
    fail_writes: Arc<Mutex<bool>>,
}

impl PortWriter for FakeWriter {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if *self.fail_writes.lock() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
        }
        self.log.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.log.rts.lock().push(level);
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.log.dtr.lock().push(level);
        Ok(())
    }
}

impl Drop for FakeWriter {
    fn drop(&mut self) {
        self.log.halves_alive.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Decoder returning verdicts from a script, recording every byte it sees.
/// Once the script runs out every byte is `Incomplete`.
pub struct ScriptedDecoder {
    verdicts: VecDeque<Verdict>,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedDecoder {
    pub fn new(verdicts: impl IntoIterator<Item = Verdict>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedDecoder {
                verdicts: verdicts.into_iter().collect(),
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl FrameDecoder for ScriptedDecoder {
    fn process_byte(&mut self, byte: u8) -> Verdict {
        self.seen.lock().push(byte);
        self.verdicts.pop_front().unwrap_or(Verdict::Incomplete)
    }
}

/// Two-byte frames: header 0x13, then a payload byte. A payload of 0xFF is
/// treated as a checksum failure; a stray non-header byte is ignored.
pub struct HeaderDecoder {
    have_header: bool,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        HeaderDecoder { have_header: false }
    }
}

impl FrameDecoder for HeaderDecoder {
    fn process_byte(&mut self, byte: u8) -> Verdict {
        if self.have_header {
            self.have_header = false;
            if byte == 0xFF {
                Verdict::Corrupt
            } else {
                Verdict::Complete
            }
        } else {
            self.have_header = byte == 0x13;
            Verdict::Incomplete
        }
    }
}

/// Connected driver over a fresh fake device with the two-byte decoder.
pub fn connected_driver(config: DriverConfig) -> (SerialDriver, FakeDevice) {
    let device = FakeDevice::new();
    let driver = SerialDriver::with_opener(HeaderDecoder::new(), device.opener(), config)
        .expect("driver construction");
    driver
        .connect(FAKE_PORT, create_serial::DEFAULT_BAUD_RATE)
        .expect("connect to fake device");
    (driver, device)
}
