//! Error types for the serial driver.

use thiserror::Error;

/// Errors that prevent a connection from being established.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The driver already has an open connection.
    #[error("already connected")]
    AlreadyConnected,

    /// The named device node does not exist.
    #[error("serial device not found: {port}")]
    DeviceNotFound {
        /// Requested device name.
        port: String,
    },

    /// The device exists but may not be opened by this process.
    #[error("permission denied opening {port}")]
    PermissionDenied {
        /// Requested device name.
        port: String,
    },

    /// The device rejected the requested settings (usually the baud rate).
    #[error("unsupported settings for {port}: {reason}")]
    InvalidSettings {
        /// Requested device name.
        port: String,
        /// Description from the device layer.
        reason: String,
    },

    /// Any other failure reported by the device layer while opening.
    #[error("failed to open {port}: {reason}")]
    Open {
        /// Requested device name.
        port: String,
        /// Description from the device layer.
        reason: String,
    },

    /// The reactor thread could not be spawned.
    #[error("failed to spawn reactor thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// No frame arrived during the first-frame handshake.
    #[error("no frame received from {port} after {attempts} attempts")]
    NoData {
        /// Requested device name.
        port: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The link dropped while waiting for the first frame.
    #[error("connection to {port} lost before the first frame")]
    Lost {
        /// Requested device name.
        port: String,
    },

    /// A previous reactor thread panicked or failed to start, and the
    /// decoder went with it.
    #[error("frame decoder unavailable: a previous reactor thread failed")]
    DecoderUnavailable,
}

/// Errors returned by driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The operation requires an open connection.
    #[error("not connected")]
    NotConnected,

    /// `start_reading` was called while a read loop is already active.
    #[error("reading already started")]
    AlreadyReading,

    /// The connection could not be established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Write or control-line failure on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reactor runtime could not be built.
    #[error("failed to build reactor runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Signal interception could not be registered.
    #[error("failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
