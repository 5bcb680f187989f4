//! Serial-link driver for robot control protocols.
//!
//! This crate owns the physical connection to a device, receives bytes
//! asynchronously on a dedicated reactor thread, hands each byte to a
//! pluggable frame decoder, and provides a synchronous transmit path for
//! protocol opcodes.
//!
//! # Architecture
//!
//! - [`SerialDriver`]: connect/disconnect, thread ownership, transmission
//! - A reactor thread runs a single-threaded tokio runtime. It keeps exactly
//!   one one-byte read outstanding and feeds every byte to the
//!   [`FrameDecoder`] in arrival order.
//! - [`DataReady`]: the cross-thread "new frame" signal consumers wait on.
//! - Optional SIGINT/SIGTERM interception inside the reactor, which tears the
//!   connection down without terminating the process.
//!
//! The driver never pushes a "disconnected" event. Consumers learn about a
//! lost link by polling [`SerialDriver::connected`] or by a wait returning
//! [`WaitOutcome::Disconnected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use create_serial::{DriverConfig, SerialDriver, Verdict, DEFAULT_BAUD_RATE};
//!
//! let decoder = |byte: u8| if byte == 0x13 { Verdict::Complete } else { Verdict::Incomplete };
//! let driver = SerialDriver::new(decoder, DriverConfig::default())?;
//! driver.connect_with_callback("/dev/ttyUSB0", DEFAULT_BAUD_RATE, || println!("frame"))?;
//! driver.send_opcode(128u8)?;
//! ```

mod config;
mod counters;
mod decoder;
mod driver;
mod error;
mod notify;
mod port;
mod reactor;
mod signals;

pub use config::*;
pub use counters::FrameStats;
pub use decoder::*;
pub use driver::*;
pub use error::*;
pub use notify::{DataReady, FrameCallback, WaitOutcome};
pub use port::*;
pub use signals::SignalKind;
