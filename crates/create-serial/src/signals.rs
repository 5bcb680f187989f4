//! Termination signal interception for the reactor.
//!
//! The listener is registered once per driver, inside the driver's runtime,
//! and lives until the driver is dropped. Registering replaces the default
//! "terminate the process" action for SIGINT/SIGTERM for the whole process;
//! if several drivers opt in, each receives every signal, but only drivers
//! with an active connection do anything with it.

use std::io;

/// Which signal arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

#[cfg(unix)]
pub(crate) struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Register for SIGINT and SIGTERM. Must be called inside a runtime
    /// context with the I/O driver enabled.
    pub(crate) fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind as UnixSignal};
        Ok(SignalListener {
            interrupt: signal(UnixSignal::interrupt())?,
            terminate: signal(UnixSignal::terminate())?,
        })
    }

    /// Wait for the next signal. Returns `None` once the runtime is gone.
    pub(crate) async fn recv(&mut self) -> Option<SignalKind> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| SignalKind::Interrupt),
            received = self.terminate.recv() => received.map(|()| SignalKind::Terminate),
        }
    }
}

#[cfg(windows)]
pub(crate) struct SignalListener {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl SignalListener {
    pub(crate) fn install() -> io::Result<Self> {
        Ok(SignalListener {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_close: tokio::signal::windows::ctrl_close()?,
        })
    }

    pub(crate) async fn recv(&mut self) -> Option<SignalKind> {
        tokio::select! {
            received = self.ctrl_c.recv() => received.map(|()| SignalKind::Interrupt),
            received = self.ctrl_close.recv() => received.map(|()| SignalKind::Terminate),
        }
    }
}

impl SignalListener {
    /// Discard signals that were delivered while no connection was active.
    pub(crate) async fn drain_pending(&mut self) -> usize {
        // Let the signal driver turn once so deliveries reach the listener.
        tokio::task::yield_now().await;
        let mut drained = 0;
        loop {
            let pending = tokio::select! {
                biased;
                received = self.recv() => received,
                () = std::future::ready(()) => None,
            };
            match pending {
                Some(_) => drained += 1,
                None => return drained,
            }
        }
    }
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener").finish_non_exhaustive()
    }
}

/// Wait on an optional listener; pends forever when there is none.
pub(crate) async fn next_signal(listener: &mut Option<SignalListener>) -> Option<SignalKind> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}
