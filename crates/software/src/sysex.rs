//! Fixed-capacity System Exclusive accumulation.
//!
//! Each transport direction owns its own [`SysexAccumulator`]: the UART receive parser, the USB
//! receive decoder, and the UMP Data Message reassembler never share one. An accumulator that
//! overflows keeps consuming input (so framing stays synchronized) but refuses to hand out the
//! truncated payload; downstream consumers must never see a partial SysEx.

use tinyvec::ArrayVec;

/// Accumulates one System Exclusive payload up to `N` bytes.
#[derive(Clone, Debug, Default)]
pub struct SysexAccumulator<const N: usize> {
    data: ArrayVec<[u8; N]>,
    in_progress: bool,
    overflow: bool,
}

impl<const N: usize> SysexAccumulator<N> {
    /// Constructs an empty accumulator.
    pub fn new() -> Self {
        Self {
            data: ArrayVec::new(),
            in_progress: false,
            overflow: false,
        }
    }

    /// Starts a fresh accumulation, discarding any previous content.
    pub fn begin(&mut self) {
        self.data.clear();
        self.in_progress = true;
        self.overflow = false;
    }

    /// Appends one byte. Once capacity is exceeded the accumulator is marked overflowed and
    /// further bytes are discarded.
    pub fn push(&mut self, byte: u8) {
        if !self.in_progress {
            return;
        }
        if self.data.try_push(byte).is_some() {
            self.overflow = true;
        }
    }

    /// Closes the accumulation and returns the payload, or `None` if nothing was in progress or
    /// the buffer overflowed. The accumulator is left open=false either way; the payload remains
    /// readable until the next [`begin`][Self::begin].
    pub fn finish(&mut self) -> Option<&[u8]> {
        if !self.in_progress {
            return None;
        }
        self.in_progress = false;
        if self.overflow {
            return None;
        }
        Some(&self.data)
    }

    /// Abandons the accumulation without yielding anything, e.g. when a conflicting status byte
    /// interrupts a SysEx mid-stream.
    pub fn abort(&mut self) {
        self.data.clear();
        self.in_progress = false;
        self.overflow = false;
    }

    /// Whether a SysEx is currently being accumulated.
    pub const fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Whether the current (or just-finished) accumulation exceeded capacity.
    pub const fn has_overflowed(&self) -> bool {
        self.overflow
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
