//! Frame decoder contract.
//!
//! The driver knows nothing about frame formats. A protocol plugs in a
//! byte-at-a-time state machine implementing [`FrameDecoder`]; the driver
//! calls it on the reactor thread for every received byte, in order, and
//! acts on the returned [`Verdict`].

/// Outcome of feeding one byte to a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The byte completed a valid frame.
    Complete,
    /// The byte completed a frame that failed validation.
    Corrupt,
    /// The frame in progress needs more bytes.
    Incomplete,
}

impl Verdict {
    /// Whether this verdict ends a frame (valid or not).
    pub fn ends_frame(self) -> bool {
        !matches!(self, Verdict::Incomplete)
    }
}

/// Byte-at-a-time frame decoder.
///
/// Implementations may write decoded state into their own shared store; that
/// store's synchronization is the implementation's concern. `process_byte`
/// runs on the reactor thread and must not block.
pub trait FrameDecoder: Send + 'static {
    /// Consume one byte and report whether it finished a frame.
    fn process_byte(&mut self, byte: u8) -> Verdict;
}

impl<F> FrameDecoder for F
where
    F: FnMut(u8) -> Verdict + Send + 'static,
{
    fn process_byte(&mut self, byte: u8) -> Verdict {
        self(byte)
    }
}
