//! MIDI 1.0 status-byte taxonomy and the [`MidiPacket`] queue unit shared by every pipeline
//! stage.
//!
//! A `MidiPacket` carries either one complete channel/system message (1–3 bytes, length matching
//! the status byte's defined arity) or a ≤3-byte slice of a System Exclusive stream. SysEx
//! payloads are accumulated elsewhere (see [`crate::sysex`]) and only travel through queues in
//! chunked form, exactly as they travel inside USB-MIDI event packets.

/// MIDI 1.0 status bytes referenced by name throughout the crate.
pub mod status {
    /// Note Off (high nibble).
    pub const NOTE_OFF: u8 = 0x80;
    /// Note On (high nibble).
    pub const NOTE_ON: u8 = 0x90;
    /// Polyphonic Key Pressure (high nibble).
    pub const POLY_KEY_PRESSURE: u8 = 0xA0;
    /// Control Change (high nibble).
    pub const CONTROL_CHANGE: u8 = 0xB0;
    /// Program Change (high nibble).
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    /// Channel Pressure (high nibble).
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    /// Pitch Bend Change (high nibble).
    pub const PITCH_BEND: u8 = 0xE0;
    /// System Exclusive start.
    pub const SYSEX_START: u8 = 0xF0;
    /// MIDI Time Code Quarter Frame.
    pub const MTC_QUARTER_FRAME: u8 = 0xF1;
    /// Song Position Pointer.
    pub const SONG_POSITION: u8 = 0xF2;
    /// Song Select.
    pub const SONG_SELECT: u8 = 0xF3;
    /// Tune Request.
    pub const TUNE_REQUEST: u8 = 0xF6;
    /// System Exclusive end.
    pub const SYSEX_END: u8 = 0xF7;
    /// Timing Clock.
    pub const TIMING_CLOCK: u8 = 0xF8;
    /// Active Sensing.
    pub const ACTIVE_SENSING: u8 = 0xFE;
    /// System Reset.
    pub const SYSTEM_RESET: u8 = 0xFF;
}

/// Interval at which the bridge transmits Active Sensing on an otherwise idle MIDI output,
/// per the MIDI 1.0 recommendation.
pub const ACTIVE_SENSING_INTERVAL_MS: u64 = 300;

/// Returns `true` for any status byte (top bit set).
pub const fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Returns `true` for System Real-Time status bytes (0xF8–0xFF).
pub const fn is_realtime(byte: u8) -> bool {
    byte >= 0xF8
}

/// Returns `true` for Channel Voice status bytes (0x80–0xEF).
pub const fn is_channel_status(byte: u8) -> bool {
    is_status(byte) && byte < 0xF0
}

/// The defined length, in bytes, of the MIDI 1.0 message introduced by `status`.
///
/// System Real-Time messages and the undefined/zero-data System Common messages (including the
/// SysEx delimiters, which are framed rather than parsed as messages) report 1.
pub const fn expected_length(status: u8) -> u8 {
    if status >= 0xF8 {
        return 1;
    }
    if status >= 0xF0 {
        return match status {
            status::MTC_QUARTER_FRAME | status::SONG_SELECT => 2,
            status::SONG_POSITION => 3,
            _ => 1,
        };
    }
    match status & 0xF0 {
        status::PROGRAM_CHANGE | status::CHANNEL_PRESSURE => 2,
        _ => 3,
    }
}

/// The unit of transfer on the bridge's internal MIDI 1.0 queues: up to three bytes of either a
/// complete message or a SysEx chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiPacket {
    data: [u8; 3],
    len: u8,
}

impl MidiPacket {
    /// Builds a packet from up to three bytes. Excess input is truncated.
    pub fn new(bytes: &[u8]) -> Self {
        let mut data = [0; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            data,
            len: len as u8,
        }
    }

    /// Builds a single-byte packet (System Real-Time, Tune Request, lone SysEx terminator).
    pub const fn single(byte: u8) -> Self {
        Self {
            data: [byte, 0, 0],
            len: 1,
        }
    }

    /// The valid bytes of the packet.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Number of valid bytes (1–3; 0 only for `Default`).
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the packet carries no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First byte of the packet. For complete messages this is the status byte; for SysEx
    /// continuation chunks it is a data byte.
    pub const fn first(&self) -> u8 {
        self.data[0]
    }

    /// Last valid byte of the packet.
    pub const fn last(&self) -> u8 {
        self.data[self.len.saturating_sub(1) as usize]
    }

    /// Returns `true` if this packet is exactly one Active Sensing byte.
    pub fn is_active_sensing(&self) -> bool {
        self.len == 1 && self.data[0] == status::ACTIVE_SENSING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_length_matches_the_midi_1_0_tables() {
        for status in 0xF8..=0xFF {
            assert_eq!(1, expected_length(status), "status {status:#04X}");
        }
        for status in [0xF0, 0xF4, 0xF5, 0xF6, 0xF7] {
            assert_eq!(1, expected_length(status), "status {status:#04X}");
        }
        assert_eq!(2, expected_length(0xF1));
        assert_eq!(3, expected_length(0xF2));
        assert_eq!(2, expected_length(0xF3));
        for channel in 0..16 {
            assert_eq!(3, expected_length(0x80 | channel));
            assert_eq!(3, expected_length(0x90 | channel));
            assert_eq!(3, expected_length(0xA0 | channel));
            assert_eq!(3, expected_length(0xB0 | channel));
            assert_eq!(2, expected_length(0xC0 | channel));
            assert_eq!(2, expected_length(0xD0 | channel));
            assert_eq!(3, expected_length(0xE0 | channel));
        }
    }

    #[test]
    fn packet_truncates_excess_input() {
        let packet = MidiPacket::new(&[0x90, 0x3C, 0x7F, 0x12, 0x34]);
        assert_eq!(&[0x90, 0x3C, 0x7F], packet.bytes());
        assert_eq!(3, packet.len());
    }

    #[test]
    fn active_sensing_is_recognized() {
        assert!(MidiPacket::single(status::ACTIVE_SENSING).is_active_sensing());
        assert!(!MidiPacket::single(status::TIMING_CLOCK).is_active_sensing());
        assert!(!MidiPacket::new(&[status::ACTIVE_SENSING, 0]).is_active_sensing());
    }
}
