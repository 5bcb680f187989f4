//! Serial device abstraction.
//!
//! An open device is split into a read half, owned by the reactor, and a
//! write half, shared by the transmit path. Dropping both halves closes the
//! device. [`SystemPorts`] opens real devices through the `serialport`
//! crate; tests supply their own [`PortOpener`].

use crate::error::ConnectError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Parameters for opening a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// Device node, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Line rate in bits per second.
    pub baud_rate: u32,
    /// How long a single `read_byte` may block before returning `Ok(None)`.
    pub read_poll_interval: Duration,
}

/// Receiving half of an open device.
pub trait PortReader: Send + 'static {
    /// Read one byte.
    ///
    /// Returns `Ok(None)` when the poll interval elapsed without data. Any
    /// `Err` means the link is gone.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

/// Transmitting half of an open device.
pub trait PortWriter: Send + 'static {
    /// Write every byte, blocking until the OS has accepted them.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Drive the RTS control line.
    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    /// Drive the DTR control line.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
}

/// A freshly opened device.
pub struct OpenPort {
    /// Half handed to the reactor.
    pub reader: Box<dyn PortReader>,
    /// Half kept by the transmit path.
    pub writer: Box<dyn PortWriter>,
}

impl std::fmt::Debug for OpenPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenPort").finish_non_exhaustive()
    }
}

/// Opens devices by name.
pub trait PortOpener: Send + Sync + 'static {
    /// Open and configure a device.
    fn open(&self, settings: &PortSettings) -> Result<OpenPort, ConnectError>;
}

/// Opens real serial devices, 8N1 without flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn open(&self, settings: &PortSettings) -> Result<OpenPort, ConnectError> {
        let port = serialport::new(settings.name.as_str(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_poll_interval)
            .open()
            .map_err(|e| open_error(&settings.name, e))?;

        let reader = port
            .try_clone()
            .map_err(|e| open_error(&settings.name, e))?;

        Ok(OpenPort {
            reader: Box::new(SerialReadHalf { port: reader }),
            writer: Box::new(SerialWriteHalf { port }),
        })
    }
}

/// Map a device-layer failure onto the connect taxonomy.
fn open_error(port: &str, err: serialport::Error) -> ConnectError {
    let port = port.to_string();
    match err.kind() {
        serialport::ErrorKind::NoDevice => ConnectError::DeviceNotFound { port },
        serialport::ErrorKind::InvalidInput => ConnectError::InvalidSettings {
            port,
            reason: err.description,
        },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectError::DeviceNotFound { port }
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectError::PermissionDenied { port }
        }
        _ => ConnectError::Open {
            port,
            reason: err.description,
        },
    }
}

struct SerialReadHalf {
    port: Box<dyn SerialPort>,
}

impl PortReader for SerialReadHalf {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            // A readable descriptor with nothing to read means the device hung up.
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial device closed",
            )),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct SerialWriteHalf {
    port: Box<dyn SerialPort>,
}

impl PortWriter for SerialWriteHalf {
    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        // The port timeout is tuned for read polling; a slow write just retries.
        while !bytes.is_empty() {
            match self.port.write(bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => bytes = &bytes[n..],
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        self.port.flush()
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.port.write_request_to_send(level).map_err(io::Error::from)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(io::Error::from)
    }
}
