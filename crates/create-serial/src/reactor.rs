//! Reactor thread: the asynchronous read engine.
//!
//! One thread per connection runs the driver's single-threaded runtime. The
//! loop keeps exactly one one-byte read outstanding while reading is wanted;
//! the next read is issued only after the previous byte has been decoded and
//! the notification (if any) delivered. Blocking device reads run on the
//! runtime's blocking pool and wake every poll interval to check the cancel
//! flag, so shutdown never waits on a silent device.

use crate::decoder::{FrameDecoder, Verdict};
use crate::driver::{DisconnectReason, Shared};
use crate::notify::NotificationBridge;
use crate::port::PortReader;
use crate::signals::{next_signal, SignalListener};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinError;
use tracing::{debug, error, info, trace, warn};

/// Messages from the lifecycle manager to the reactor.
#[derive(Debug)]
pub(crate) enum ReactorCommand {
    /// Reading was (re)enabled; issue a read if none is outstanding.
    Resume,
    /// Leave the event loop.
    Shutdown,
}

/// State that outlives a single connection. Handed to each reactor and
/// parked back in the driver when the reactor exits.
pub(crate) struct ReactorParts {
    pub(crate) decoder: Box<dyn FrameDecoder>,
    pub(crate) signals: Option<SignalListener>,
}

type ReadCompletion = (Box<dyn PortReader>, io::Result<u8>);
type PendingRead = tokio::task::JoinHandle<ReadCompletion>;

pub(crate) struct Reactor {
    shared: Arc<Shared>,
    reader: Option<Box<dyn PortReader>>,
    parts: ReactorParts,
    bridge: NotificationBridge,
    commands: UnboundedReceiver<ReactorCommand>,
    cancel: Arc<AtomicBool>,
}

impl Reactor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        reader: Box<dyn PortReader>,
        parts: ReactorParts,
        bridge: NotificationBridge,
        commands: UnboundedReceiver<ReactorCommand>,
    ) -> Self {
        Reactor {
            shared,
            reader: Some(reader),
            parts,
            bridge,
            commands,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the event loop until shutdown, a signal, or a read failure.
    pub(crate) async fn run(mut self) -> ReactorParts {
        if let Some(signals) = self.parts.signals.as_mut() {
            let drained = signals.drain_pending().await;
            if drained > 0 {
                debug!(drained, "discarded signals delivered while disconnected");
            }
        }

        let mut pending: Option<PendingRead> = None;
        loop {
            if pending.is_none() && self.shared.reading_wanted() {
                if let Some(reader) = self.reader.take() {
                    pending = Some(self.issue_read(reader));
                }
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ReactorCommand::Resume) => continue,
                    Some(ReactorCommand::Shutdown) | None => break,
                },

                signal = next_signal(&mut self.parts.signals) => match signal {
                    Some(kind) => {
                        info!(?kind, "signal received, disconnecting");
                        self.shared.teardown(DisconnectReason::Signal(kind));
                        break;
                    }
                    // The runtime is shutting down the signal driver.
                    None => self.parts.signals = None,
                },

                completion = wait_read(&mut pending) => {
                    pending = None;
                    match completion {
                        Ok((reader, Ok(byte))) => {
                            self.reader = Some(reader);
                            if self.shared.reading_wanted() {
                                self.dispatch(byte);
                            } else {
                                trace!(byte, "discarding byte read after stop");
                            }
                        }
                        Ok((_reader, Err(e))) => {
                            warn!(error = %e, "serial read failed, connection lost");
                            self.shared.teardown(DisconnectReason::LinkLost);
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "read task failed, connection lost");
                            self.shared.teardown(DisconnectReason::LinkLost);
                            break;
                        }
                    }
                }
            }
        }

        // Let an in-flight read notice the cancel flag and release the device.
        self.cancel.store(true, Ordering::Release);
        if let Some(read) = pending {
            let _ = read.await;
        }
        debug!("reactor loop exited");
        self.parts
    }

    fn issue_read(&self, mut reader: Box<dyn PortReader>) -> PendingRead {
        let cancel = self.cancel.clone();
        tokio::task::spawn_blocking(move || {
            let result = read_one(reader.as_mut(), &cancel);
            (reader, result)
        })
    }

    /// Feed one byte to the decoder and act on its verdict.
    fn dispatch(&mut self, byte: u8) {
        trace!(byte, "received");
        let verdict = self.parts.decoder.process_byte(byte);
        self.shared.counters.record(verdict);
        match verdict {
            Verdict::Complete => self.bridge.notify_data_ready(),
            Verdict::Corrupt => debug!("decoder reported a corrupt frame"),
            Verdict::Incomplete => {}
        }
    }
}

/// Block until one byte arrives, the device fails, or the read is cancelled.
fn read_one(reader: &mut dyn PortReader, cancel: &AtomicBool) -> io::Result<u8> {
    loop {
        if cancel.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "read cancelled"));
        }
        if let Some(byte) = reader.read_byte()? {
            return Ok(byte);
        }
    }
}

/// Wait on the outstanding read; pends forever when there is none.
async fn wait_read(pending: &mut Option<PendingRead>) -> Result<ReadCompletion, JoinError> {
    match pending {
        Some(read) => read.await,
        None => std::future::pending().await,
    }
}

/// Start the reactor thread. The thread parks the connection-independent
/// parts back into `Shared` before exiting.
pub(crate) fn spawn(runtime: Arc<Runtime>, reactor: Reactor) -> io::Result<JoinHandle<()>> {
    let shared = reactor.shared.clone();
    thread::Builder::new()
        .name("serial-reactor".to_string())
        .spawn(move || {
            let parts = runtime.block_on(reactor.run());
            shared.park(parts);
        })
}
