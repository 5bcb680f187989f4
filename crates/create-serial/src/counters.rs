//! Frame diagnostics.

use crate::decoder::Verdict;
use parking_lot::Mutex;

/// Snapshot of the frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames that ended, valid or corrupt.
    pub total: u64,
    /// Frames the decoder rejected.
    pub corrupt: u64,
}

impl FrameStats {
    /// Frames that ended and passed validation.
    pub fn valid(&self) -> u64 {
        self.total - self.corrupt
    }
}

/// Counters written by the reactor thread, readable from anywhere.
///
/// Both values live under one lock so a snapshot never shows more corrupt
/// frames than total frames.
#[derive(Debug, Default)]
pub(crate) struct PacketCounters {
    stats: Mutex<FrameStats>,
}

impl PacketCounters {
    /// Account for one decoder verdict.
    pub(crate) fn record(&self, verdict: Verdict) {
        if !verdict.ends_frame() {
            return;
        }
        let mut stats = self.stats.lock();
        stats.total += 1;
        if verdict == Verdict::Corrupt {
            stats.corrupt += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> FrameStats {
        *self.stats.lock()
    }

    pub(crate) fn reset(&self) {
        *self.stats.lock() = FrameStats::default();
    }
}
