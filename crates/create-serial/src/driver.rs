//! Connection lifecycle and transmission.
//!
//! [`SerialDriver`] is the single owner of a connection. The reactor thread
//! and consumer threads reference its [`Shared`] state without owning the
//! driver. Connect and disconnect are serialized through the connection
//! state; disconnect may be called from any thread, including the reactor
//! itself, which must never join its own thread.

use crate::config::{DriverConfig, FirstFrameConfig};
use crate::counters::{FrameStats, PacketCounters};
use crate::decoder::FrameDecoder;
use crate::error::{ConnectError, DriverError, Result};
use crate::notify::{DataReady, FrameCallback, NotificationBridge, WaitOutcome};
use crate::port::{PortOpener, PortSettings, PortWriter, SystemPorts};
use crate::reactor::{self, Reactor, ReactorCommand, ReactorParts};
use crate::signals::{SignalKind, SignalListener};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};

// ============================================================================
// Public Types
// ============================================================================

/// Connection state as seen by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device is open.
    Closed,
    /// The device is open but no read loop is active.
    Open,
    /// The device is open and the reactor keeps a read outstanding.
    Reading,
}

/// Why the most recent connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called (or the driver was dropped).
    Requested,
    /// A termination signal arrived while connected.
    Signal(SignalKind),
    /// A read or write on the device failed.
    LinkLost,
}

/// Single-byte command value sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        Opcode(code)
    }
}

impl From<Opcode> for u8 {
    fn from(code: Opcode) -> Self {
        code.0
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// Handles for the running reactor, present while a connection is up.
struct ReactorControl {
    commands: UnboundedSender<ReactorCommand>,
    thread: JoinHandle<()>,
}

/// State referenced by the driver, the reactor thread, and consumers.
///
/// Lock order: `state` before `control` before `stale`.
pub(crate) struct Shared {
    state: Mutex<ConnectionState>,
    /// Checked by the reactor when a read completes; cleared by `stop_reading`.
    reading_wanted: AtomicBool,
    writer: Mutex<Option<Box<dyn PortWriter>>>,
    control: Mutex<Option<ReactorControl>>,
    /// Reactor thread awaiting a join. Held locked for the whole join so
    /// nobody proceeds before the reactor has parked its parts.
    stale: Mutex<Option<JoinHandle<()>>>,
    /// Most recent reactor thread. Checked without touching `stale`, so the
    /// reactor never blocks on a join of itself.
    reactor_id: Mutex<Option<ThreadId>>,
    parked: Mutex<Option<ReactorParts>>,
    pub(crate) ready: Arc<DataReady>,
    pub(crate) counters: PacketCounters,
    last_disconnect: Mutex<Option<DisconnectReason>>,
    stop_sequence: Vec<u8>,
}

impl Shared {
    fn new(parts: ReactorParts, stop_sequence: Vec<u8>) -> Self {
        Shared {
            state: Mutex::new(ConnectionState::Closed),
            reading_wanted: AtomicBool::new(false),
            writer: Mutex::new(None),
            control: Mutex::new(None),
            stale: Mutex::new(None),
            reactor_id: Mutex::new(None),
            parked: Mutex::new(Some(parts)),
            ready: Arc::new(DataReady::new()),
            counters: PacketCounters::default(),
            last_disconnect: Mutex::new(None),
            stop_sequence,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn reading_wanted(&self) -> bool {
        self.reading_wanted.load(Ordering::Acquire)
    }

    /// Return the connection-independent parts after a reactor exits.
    pub(crate) fn park(&self, parts: ReactorParts) {
        *self.parked.lock() = Some(parts);
    }

    /// Close the connection. Exactly one caller performs the teardown and
    /// returns `true`. The rest observe `Closed`, wait for the reactor of
    /// that teardown to exit, and return `false`.
    ///
    /// Called from the reactor thread, this stops the loop without joining;
    /// the thread is joined by the next caller off the reactor.
    pub(crate) fn teardown(&self, reason: DisconnectReason) -> bool {
        let commands = {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                drop(state);
                self.reap_stale();
                return false;
            }
            *state = ConnectionState::Closed;
            self.reading_wanted.store(false, Ordering::Release);
            self.control.lock().take().map(|control| {
                *self.stale.lock() = Some(control.thread);
                control.commands
            })
        };

        *self.last_disconnect.lock() = Some(reason);
        self.close_writer();
        self.ready.close();
        info!(?reason, "serial link closed");

        if let Some(commands) = commands {
            // On the reactor thread this is read after the caller returns.
            let _ = commands.send(ReactorCommand::Shutdown);
        }
        self.reap_stale();
        true
    }

    /// Send the stop sequence (best effort) and drop the write half.
    fn close_writer(&self) {
        let Some(mut writer) = self.writer.lock().take() else {
            return;
        };
        if !self.stop_sequence.is_empty() {
            if let Err(e) = writer.write_all(&self.stop_sequence) {
                debug!(error = %e, "failed to send stop sequence");
            }
        }
    }

    fn on_reactor(&self) -> bool {
        *self.reactor_id.lock() == Some(thread::current().id())
    }

    /// Join a reactor thread that has been told to stop, unless it is the
    /// calling thread. The stop sequence and write half are released before
    /// the reactor is told to stop, so once this returns off the reactor the
    /// device is fully closed.
    fn reap_stale(&self) {
        if self.on_reactor() {
            return;
        }
        let mut stale = self.stale.lock();
        if let Some(handle) = stale.take() {
            if handle.join().is_err() {
                error!("reactor thread panicked; frame decoder lost");
            }
        }
    }
}

// ============================================================================
// Serial Driver
// ============================================================================

/// Serial-link driver: lifecycle, reception, and transmission.
///
/// All methods take `&self`; the driver is `Sync` and can be shared with
/// consumer threads behind an `Arc`.
pub struct SerialDriver {
    shared: Arc<Shared>,
    opener: Box<dyn PortOpener>,
    config: DriverConfig,
    runtime: Arc<Runtime>,
    connect_lock: Mutex<()>,
}

impl std::fmt::Debug for SerialDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDriver")
            .field("state", &self.shared.state())
            .field("stats", &self.shared.counters.snapshot())
            .field("config", &self.config)
            .finish()
    }
}

impl SerialDriver {
    /// Create a driver for real serial devices.
    pub fn new(decoder: impl FrameDecoder, config: DriverConfig) -> Result<Self> {
        Self::with_opener(decoder, SystemPorts, config)
    }

    /// Create a driver that opens devices through `opener`.
    ///
    /// Builds the reactor runtime and, if the config opts in, registers the
    /// signal listener; both live as long as the driver.
    pub fn with_opener(
        decoder: impl FrameDecoder,
        opener: impl PortOpener,
        config: DriverConfig,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DriverError::Runtime)?;

        let signals = if config.install_signal_handler {
            let _guard = runtime.enter();
            Some(SignalListener::install().map_err(DriverError::Signal)?)
        } else {
            None
        };

        let parts = ReactorParts {
            decoder: Box::new(decoder),
            signals,
        };

        Ok(SerialDriver {
            shared: Arc::new(Shared::new(parts, config.stop_sequence.clone())),
            opener: Box::new(opener),
            config,
            runtime: Arc::new(runtime),
            connect_lock: Mutex::new(()),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open `port` and start reading, without a frame callback.
    pub fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        self.connect_inner(port, baud_rate, None)
    }

    /// Open `port` and start reading; `callback` runs on the reactor thread
    /// after every complete frame.
    pub fn connect_with_callback<F>(&self, port: &str, baud_rate: u32, callback: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.connect_inner(port, baud_rate, Some(Box::new(callback)))
    }

    fn connect_inner(
        &self,
        port: &str,
        baud_rate: u32,
        callback: Option<FrameCallback>,
    ) -> Result<()> {
        let _serialized = self.connect_lock.lock();
        if self.shared.state() != ConnectionState::Closed {
            return Err(ConnectError::AlreadyConnected.into());
        }

        // A reactor that stopped itself may still be finishing.
        self.shared.reap_stale();
        let parts = self
            .shared
            .parked
            .lock()
            .take()
            .ok_or(ConnectError::DecoderUnavailable)?;

        let settings = PortSettings {
            name: port.to_string(),
            baud_rate,
            read_poll_interval: self.config.read_poll_interval(),
        };
        let opened = match self.opener.open(&settings) {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.park(parts);
                return Err(e.into());
            }
        };
        info!(port, baud_rate, "serial port opened");

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        self.shared.counters.reset();
        self.shared.ready.open();

        {
            let mut state = self.shared.state.lock();
            let (commands, command_rx) = mpsc::unbounded_channel();
            let bridge = NotificationBridge::new(self.shared.ready.clone(), callback);
            let reactor = Reactor::new(
                self.shared.clone(),
                opened.reader,
                parts,
                bridge,
                command_rx,
            );
            let thread = match reactor::spawn(self.runtime.clone(), reactor) {
                Ok(thread) => thread,
                Err(e) => {
                    self.shared.ready.close();
                    return Err(ConnectError::Spawn(e).into());
                }
            };
            *self.shared.reactor_id.lock() = Some(thread.thread().id());
            *self.shared.writer.lock() = Some(opened.writer);
            *self.shared.control.lock() = Some(ReactorControl { commands, thread });
            *state = ConnectionState::Open;
        }

        let started = self.start_reading().and_then(|()| {
            if self.config.start_sequence.is_empty() {
                Ok(())
            } else {
                self.send(&self.config.start_sequence)
            }
        });
        if let Err(e) = started {
            // The link may have dropped already; make sure the reactor is gone.
            self.disconnect();
            return Err(e);
        }

        if let Some(first_frame) = &self.config.first_frame {
            self.await_first_frame(port, first_frame)?;
        }
        Ok(())
    }

    /// Block until the first complete frame, re-sending the start sequence
    /// after each timed-out attempt but the last.
    fn await_first_frame(&self, port: &str, first_frame: &FirstFrameConfig) -> Result<()> {
        let attempts = first_frame.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.shared.ready.wait_timeout(first_frame.timeout()) {
                WaitOutcome::Ready => return Ok(()),
                WaitOutcome::Disconnected => {
                    self.disconnect();
                    return Err(ConnectError::Lost {
                        port: port.to_string(),
                    }
                    .into());
                }
                WaitOutcome::TimedOut => {
                    warn!(port, attempt, attempts, "no frame received yet");
                    if attempt < attempts && !self.config.start_sequence.is_empty() {
                        self.send(&self.config.start_sequence)?;
                    }
                }
            }
        }
        self.disconnect();
        Err(ConnectError::NoData {
            port: port.to_string(),
            attempts,
        }
        .into())
    }

    /// Close the connection. Safe to call when already closed and from any
    /// thread. From a non-reactor thread it returns only after the reactor
    /// thread has exited and the device is closed, even when another thread
    /// or the reactor itself started the teardown.
    pub fn disconnect(&self) {
        self.shared.teardown(DisconnectReason::Requested);
    }

    /// Whether a device is currently open.
    pub fn connected(&self) -> bool {
        self.shared.state() != ConnectionState::Closed
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Why the most recent connection ended, if one has ended.
    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        *self.shared.last_disconnect.lock()
    }

    // ------------------------------------------------------------------------
    // Read Control
    // ------------------------------------------------------------------------

    /// Resume the read loop on an open connection.
    pub fn start_reading(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        match *state {
            ConnectionState::Closed => Err(DriverError::NotConnected),
            ConnectionState::Reading => Err(DriverError::AlreadyReading),
            ConnectionState::Open => {
                *state = ConnectionState::Reading;
                self.shared.reading_wanted.store(true, Ordering::Release);
                if let Some(control) = self.shared.control.lock().as_ref() {
                    let _ = control.commands.send(ReactorCommand::Resume);
                }
                debug!("reading started");
                Ok(())
            }
        }
    }

    /// Stop issuing reads. A read already in flight completes and its byte
    /// is discarded.
    pub fn stop_reading(&self) {
        let mut state = self.shared.state.lock();
        if *state == ConnectionState::Reading {
            *state = ConnectionState::Open;
            self.shared.reading_wanted.store(false, Ordering::Release);
            debug!("reading stopped");
        }
    }

    // ------------------------------------------------------------------------
    // Transmission
    // ------------------------------------------------------------------------

    /// Write `bytes`, blocking until the OS has accepted them.
    ///
    /// A write failure is treated as a lost link and closes the connection.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let result = {
            let mut writer = self.shared.writer.lock();
            let writer = writer.as_mut().ok_or(DriverError::NotConnected)?;
            writer.write_all(bytes)
        };
        if let Err(e) = result {
            warn!(error = %e, "serial write failed, connection lost");
            self.shared.teardown(DisconnectReason::LinkLost);
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a single opcode byte.
    pub fn send_opcode(&self, code: impl Into<Opcode>) -> Result<()> {
        let code = code.into();
        self.send(&[code.0])
    }

    /// Drive the RTS control line.
    pub fn set_rts(&self, enabled: bool) -> Result<()> {
        let mut writer = self.shared.writer.lock();
        let writer = writer.as_mut().ok_or(DriverError::NotConnected)?;
        writer.set_rts(enabled)?;
        Ok(())
    }

    /// Drive the DTR control line.
    pub fn set_dtr(&self, enabled: bool) -> Result<()> {
        let mut writer = self.shared.writer.lock();
        let writer = writer.as_mut().ok_or(DriverError::NotConnected)?;
        writer.set_dtr(enabled)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Consumers and Diagnostics
    // ------------------------------------------------------------------------

    /// Block until a frame completes or the connection closes.
    pub fn wait_for_data(&self) -> WaitOutcome {
        self.shared.ready.wait()
    }

    /// Like [`wait_for_data`](Self::wait_for_data) with an upper bound.
    pub fn wait_for_data_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.shared.ready.wait_timeout(timeout)
    }

    /// Shared handle for consumer threads that do not hold the driver.
    pub fn notifier(&self) -> Arc<DataReady> {
        self.shared.ready.clone()
    }

    /// Consistent snapshot of both frame counters.
    pub fn frame_stats(&self) -> FrameStats {
        self.shared.counters.snapshot()
    }

    /// Frames that ended, valid or corrupt, on the current connection.
    pub fn total_frames(&self) -> u64 {
        self.frame_stats().total
    }

    /// Frames the decoder rejected on the current connection.
    pub fn corrupt_frames(&self) -> u64 {
        self.frame_stats().corrupt
    }
}

impl Drop for SerialDriver {
    fn drop(&mut self) {
        self.disconnect();
        // Deregister the signal listener while its runtime is still alive.
        drop(self.shared.parked.lock().take());
    }
}
