//! Byte-at-a-time MIDI 1.0 stream parser.
//!
//! [`Midi1Parser::feed`] consumes one raw byte from the UART and yields at most one event.
//! System Real-Time bytes are recognized before anything else and pass straight through, so a
//! Timing Clock arriving in the middle of a Note On (or inside a SysEx) never corrupts the
//! pending message. Running status is honored for Channel Voice messages; System Common messages
//! are emitted whole but cancel it, per the MIDI 1.0 specification.

use crate::message::{self, MidiPacket, status};
use crate::sysex::SysexAccumulator;

/// One parsing outcome from [`Midi1Parser::feed`].
#[derive(Debug, PartialEq, Eq)]
pub enum MidiEvent<'a> {
    /// A complete 1-3 byte Channel Voice, System Common, or System Real-Time message.
    Message(MidiPacket),
    /// A complete System Exclusive payload, including the 0xF0 and 0xF7 delimiters.
    Sysex(&'a [u8]),
    /// A System Exclusive message exceeded the parser's buffer and was discarded whole.
    SysexOverflow,
}

/// Streaming MIDI 1.0 parser with an `N`-byte System Exclusive buffer.
///
/// By default Active Sensing bytes are absorbed rather than forwarded; an attached keyboard's
/// keep-alive would otherwise flood the USB side. The bridge regenerates its own keep-alive on
/// the transmit path.
#[derive(Debug)]
pub struct Midi1Parser<const N: usize = 1024> {
    message: [u8; 3],
    index: u8,
    expected: u8,
    running_status: u8,
    filter_active_sensing: bool,
    sysex: SysexAccumulator<N>,
}

impl<const N: usize> Default for Midi1Parser<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Midi1Parser<N> {
    /// Constructs a parser in the idle state, with the Active Sensing filter enabled.
    pub fn new() -> Self {
        Self {
            message: [0; 3],
            index: 0,
            expected: 0,
            running_status: 0,
            filter_active_sensing: true,
            sysex: SysexAccumulator::new(),
        }
    }

    /// Enables or disables the Active Sensing receive filter.
    pub fn with_active_sensing_filter(mut self, enabled: bool) -> Self {
        self.filter_active_sensing = enabled;
        self
    }

    /// Consumes one byte from the wire.
    pub fn feed(&mut self, byte: u8) -> Option<MidiEvent<'_>> {
        // Real-time first: it may appear between any two bytes and must not touch parser state.
        if message::is_realtime(byte) {
            if byte == status::ACTIVE_SENSING && self.filter_active_sensing {
                return None;
            }
            return Some(MidiEvent::Message(MidiPacket::single(byte)));
        }

        if byte == status::SYSEX_START {
            self.index = 0;
            self.running_status = 0;
            self.sysex.begin();
            self.sysex.push(byte);
            return None;
        }

        if byte == status::SYSEX_END {
            if !self.sysex.is_in_progress() {
                // Stray terminator with no SysEx open.
                return None;
            }
            self.sysex.push(byte);
            return match self.sysex.finish() {
                Some(payload) => Some(MidiEvent::Sysex(payload)),
                None => Some(MidiEvent::SysexOverflow),
            };
        }

        if message::is_status(byte) {
            // Any other status byte terminates an open SysEx without a payload and replaces a
            // partially received message.
            self.sysex.abort();
            self.expected = message::expected_length(byte);
            if self.expected == 1 {
                // Tune Request and the undefined 0xF4/0xF5: emitted alone, cancel running status.
                self.index = 0;
                self.running_status = 0;
                return Some(MidiEvent::Message(MidiPacket::single(byte)));
            }
            self.message[0] = byte;
            self.index = 1;
            self.running_status = if message::is_channel_status(byte) {
                byte
            } else {
                0
            };
            return None;
        }

        // Data byte.
        if self.sysex.is_in_progress() {
            self.sysex.push(byte);
            return None;
        }
        if self.index == 0 {
            if self.running_status == 0 {
                // Orphan data byte; nothing to attach it to.
                return None;
            }
            self.message[0] = self.running_status;
            self.expected = message::expected_length(self.running_status);
            self.index = 1;
        }
        self.message[self.index as usize] = byte;
        self.index += 1;
        if self.index == self.expected {
            let packet = MidiPacket::new(&self.message[..self.expected as usize]);
            self.index = 0;
            return Some(MidiEvent::Message(packet));
        }
        None
    }

    /// Drops all in-flight state after an input discontinuity (UART overrun, cable swap).
    /// Running status, any partial message, and any open SysEx are discarded so parsing
    /// resynchronizes on the next status byte.
    pub fn resync(&mut self) {
        self.index = 0;
        self.expected = 0;
        self.running_status = 0;
        self.sysex.abort();
    }
}

/// Splits a complete SysEx payload into the ≤3-byte [`MidiPacket`]s used on internal queues.
pub fn sysex_chunks(payload: &[u8]) -> impl Iterator<Item = MidiPacket> + '_ {
    payload.chunks(3).map(MidiPacket::new)
}
