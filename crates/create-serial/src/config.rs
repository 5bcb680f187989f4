//! Driver configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rate used when the caller has no reason to pick another.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default wake interval for a blocked one-byte read (milliseconds).
pub const DEFAULT_READ_POLL_INTERVAL_MS: u64 = 100;

/// Default per-attempt wait for the first frame (milliseconds).
pub const DEFAULT_FIRST_FRAME_TIMEOUT_MS: u64 = 500;

/// Default number of first-frame attempts before giving up.
pub const DEFAULT_FIRST_FRAME_ATTEMPTS: u32 = 10;

/// Configuration for a [`SerialDriver`](crate::SerialDriver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Intercept SIGINT/SIGTERM in the reactor and disconnect on receipt.
    pub install_signal_handler: bool,
    /// How often a blocked read wakes to check for shutdown (milliseconds).
    /// A wake-up without data is not an error; the read simply continues.
    pub read_poll_interval_ms: u64,
    /// Pause after opening the device before reading starts (milliseconds).
    pub settle_delay_ms: u64,
    /// Bytes written as soon as reading starts.
    pub start_sequence: Vec<u8>,
    /// Bytes written, best effort, just before the port is closed.
    pub stop_sequence: Vec<u8>,
    /// Block `connect` until the first complete frame arrives.
    pub first_frame: Option<FirstFrameConfig>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            install_signal_handler: false,
            read_poll_interval_ms: DEFAULT_READ_POLL_INTERVAL_MS,
            settle_delay_ms: 0,
            start_sequence: Vec::new(),
            stop_sequence: Vec::new(),
            first_frame: None,
        }
    }
}

impl DriverConfig {
    /// Read poll interval as a [`Duration`], never zero.
    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms.max(1))
    }

    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// First-frame handshake performed by `connect`.
///
/// The start sequence is re-sent after every timed-out attempt except the
/// last one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstFrameConfig {
    /// Wait per attempt (milliseconds).
    pub timeout_ms: u64,
    /// Attempts before the connection is abandoned.
    pub max_attempts: u32,
}

impl Default for FirstFrameConfig {
    fn default() -> Self {
        FirstFrameConfig {
            timeout_ms: DEFAULT_FIRST_FRAME_TIMEOUT_MS,
            max_attempts: DEFAULT_FIRST_FRAME_ATTEMPTS,
        }
    }
}

impl FirstFrameConfig {
    /// Per-attempt wait as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
