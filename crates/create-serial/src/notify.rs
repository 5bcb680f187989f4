//! Cross-thread "data ready" notification.
//!
//! The reactor thread raises the flag when a frame completes; consumer
//! threads block on it. Waits check a predicate under the lock, so spurious
//! wake-ups are never reported as data, and a closed link releases every
//! waiter with [`WaitOutcome::Disconnected`].

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Action invoked on the reactor thread each time a frame completes.
///
/// It must not block and must not call back into the driver's connect or
/// disconnect operations.
pub type FrameCallback = Box<dyn FnMut() + Send + 'static>;

/// Result of waiting for fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A frame completed since the wait began (or was pending unconsumed).
    Ready,
    /// The timeout elapsed first.
    TimedOut,
    /// The connection is closed; no data will arrive.
    Disconnected,
}

#[derive(Debug, Default)]
struct ReadyState {
    /// Set by the reactor, cleared by the consumer that observes it.
    ready: bool,
    /// Bumped on every notification so every blocked waiter sees it.
    sequence: u64,
    connected: bool,
}

/// Shared flag and condition variable for frame notifications.
#[derive(Debug, Default)]
pub struct DataReady {
    state: Mutex<ReadyState>,
    cond: Condvar,
}

impl DataReady {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the link open and forget any notification from a previous link.
    pub(crate) fn open(&self) {
        let mut state = self.state.lock();
        state.connected = true;
        state.ready = false;
    }

    /// Mark the link closed and release every waiter.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        self.cond.notify_all();
    }

    /// Raise the flag and wake every blocked waiter.
    pub(crate) fn notify(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        state.sequence = state.sequence.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Whether a notification is pending and unconsumed.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Block until a frame completes or the link closes.
    pub fn wait(&self) -> WaitOutcome {
        self.wait_inner(None)
    }

    /// Block until a frame completes, the link closes, or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.wait_inner(Some(Instant::now() + timeout))
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> WaitOutcome {
        let mut state = self.state.lock();
        let entry = state.sequence;
        loop {
            if state.ready || state.sequence != entry {
                state.ready = false;
                return WaitOutcome::Ready;
            }
            if !state.connected {
                return WaitOutcome::Disconnected;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        // One last look: the notify may have raced the timeout.
                        if state.ready || state.sequence != entry {
                            state.ready = false;
                            return WaitOutcome::Ready;
                        }
                        if !state.connected {
                            return WaitOutcome::Disconnected;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// Reactor-side half of the bridge: raises the flag, then runs the callback.
pub(crate) struct NotificationBridge {
    ready: Arc<DataReady>,
    callback: Option<FrameCallback>,
}

impl NotificationBridge {
    pub(crate) fn new(ready: Arc<DataReady>, callback: Option<FrameCallback>) -> Self {
        NotificationBridge { ready, callback }
    }

    /// Tell waiting consumers a fresh frame is available.
    pub(crate) fn notify_data_ready(&mut self) {
        self.ready.notify();
        if let Some(callback) = self.callback.as_mut() {
            callback();
        }
    }
}
