//! USB-MIDI 1.0 event packet codec (USB Device Class Definition for MIDI Devices, v1.0).
//!
//! Every transfer on the USB MIDI streaming endpoints is a sequence of 4-byte event packets:
//! a cable/CIN header byte followed by up to three MIDI bytes, zero-padded. [`encode_packet`]
//! wraps an internal [`MidiPacket`] for transmission; [`UsbMidiDecoder`] unwraps received
//! packets, reassembling SysEx payloads that span multiple events.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::message::{self, MidiPacket, status};
use crate::sysex::SysexAccumulator;

/// Code Index Number: the low nibble of a USB-MIDI event packet's header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cin {
    /// Miscellaneous function code (reserved).
    Misc = 0x0,
    /// Cable event (reserved).
    CableEvent = 0x1,
    /// Two-byte System Common message.
    SystemCommonTwoByte = 0x2,
    /// Three-byte System Common message.
    SystemCommonThreeByte = 0x3,
    /// SysEx starts or continues.
    SysexStartContinue = 0x4,
    /// Single-byte System Common message, or SysEx ending with one byte.
    SysexEndOneByte = 0x5,
    /// SysEx ending with two bytes.
    SysexEndTwoByte = 0x6,
    /// SysEx ending with three bytes.
    SysexEndThreeByte = 0x7,
    /// Note Off.
    NoteOff = 0x8,
    /// Note On.
    NoteOn = 0x9,
    /// Polyphonic Key Pressure.
    PolyKeyPressure = 0xA,
    /// Control Change.
    ControlChange = 0xB,
    /// Program Change.
    ProgramChange = 0xC,
    /// Channel Pressure.
    ChannelPressure = 0xD,
    /// Pitch Bend Change.
    PitchBend = 0xE,
    /// Single byte (unparsed, including System Real-Time).
    SingleByte = 0xF,
}

/// Number of valid MIDI bytes implied by a CIN. Reserved codes default to three so that a
/// misbehaving host cannot desynchronize the decoder.
pub const fn cin_length(cin: u8) -> u8 {
    match cin & 0x0F {
        0x5 | 0xF => 1,
        0x2 | 0x6 | 0xC | 0xD => 2,
        _ => 3,
    }
}

/// Encodes one internal [`MidiPacket`] as a 4-byte USB-MIDI event packet for the given virtual
/// cable.
///
/// SysEx chunks (a leading 0xF0, a trailing 0xF7, or no status byte at all) map onto the
/// start/continue/end CINs; complete messages map onto their dedicated CINs, with all
/// single-byte messages using the unparsed [`Cin::SingleByte`] code.
pub fn encode_packet(packet: &MidiPacket, cable: u8) -> [u8; 4] {
    let bytes = packet.bytes();
    let first = packet.first();
    let cin = if packet.last() == status::SYSEX_END {
        // 0x5/0x6/0x7 by how many bytes close the SysEx.
        Cin::SysexStartContinue as u8 + bytes.len() as u8
    } else if first == status::SYSEX_START || !message::is_status(first) {
        Cin::SysexStartContinue as u8
    } else {
        match bytes.len() {
            1 => Cin::SingleByte as u8,
            2 => match first & 0xF0 {
                0xC0 | 0xD0 => first >> 4,
                _ => Cin::SystemCommonTwoByte as u8,
            },
            _ => {
                if first == status::SONG_POSITION {
                    Cin::SystemCommonThreeByte as u8
                } else {
                    first >> 4
                }
            }
        }
    };

    let mut out = [(cable << 4) | cin, 0, 0, 0];
    out[1..1 + bytes.len()].copy_from_slice(bytes);
    out
}

/// One decoding outcome from [`UsbMidiDecoder::decode`].
#[derive(Debug, PartialEq, Eq)]
pub enum UsbRxEvent<'a> {
    /// A complete 1-3 byte MIDI message.
    Message(MidiPacket),
    /// A complete System Exclusive payload, including the 0xF0 and 0xF7 delimiters.
    Sysex(&'a [u8]),
    /// A received SysEx exceeded the decoder's buffer and was discarded whole.
    SysexOverflow,
}

/// Decodes received USB-MIDI event packets, buffering SysEx payloads up to `N` bytes.
#[derive(Debug, Default)]
pub struct UsbMidiDecoder<const N: usize = 1024> {
    sysex: SysexAccumulator<N>,
}

impl<const N: usize> UsbMidiDecoder<N> {
    /// Constructs a decoder with no SysEx in progress.
    pub fn new() -> Self {
        Self {
            sysex: SysexAccumulator::new(),
        }
    }

    /// Consumes one 4-byte event packet. The cable nibble is ignored; the bridge exposes a
    /// single virtual cable.
    pub fn decode(&mut self, packet: [u8; 4]) -> Option<UsbRxEvent<'_>> {
        let cin = packet[0] & 0x0F;
        let data = &packet[1..1 + cin_length(cin) as usize];

        match Cin::from_u8(cin) {
            Some(Cin::SysexStartContinue) => {
                if data[0] == status::SYSEX_START {
                    // 0xF0 always restarts accumulation, abandoning any open transfer.
                    self.sysex.begin();
                } else if !self.sysex.is_in_progress() {
                    // Continuation with no SysEx open; host desync, drop it.
                    return None;
                }
                for &byte in data {
                    self.sysex.push(byte);
                }
                None
            }
            Some(Cin::SysexEndOneByte) if data[0] == status::SYSEX_END => self.end_sysex(data),
            Some(Cin::SysexEndOneByte) | Some(Cin::SingleByte) => {
                Some(UsbRxEvent::Message(MidiPacket::single(data[0])))
            }
            Some(Cin::SysexEndTwoByte) | Some(Cin::SysexEndThreeByte) => self.end_sysex(data),
            _ => Some(UsbRxEvent::Message(MidiPacket::new(data))),
        }
    }

    fn end_sysex(&mut self, data: &[u8]) -> Option<UsbRxEvent<'_>> {
        if data[0] == status::SYSEX_START {
            // An entire short SysEx in a single end packet; restarts like any other 0xF0.
            self.sysex.begin();
        } else if !self.sysex.is_in_progress() {
            return None;
        }
        for &byte in data {
            self.sysex.push(byte);
            // Some hosts pad the end packet after the terminator.
            if byte == status::SYSEX_END {
                break;
            }
        }
        match self.sysex.finish() {
            Some(payload) => Some(UsbRxEvent::Sysex(payload)),
            None => Some(UsbRxEvent::SysexOverflow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::sysex_chunks;

    #[test]
    fn cin_length_matches_the_class_definition() {
        assert_eq!(1, cin_length(0x5));
        assert_eq!(1, cin_length(0xF));
        for cin in [0x2, 0x6, 0xC, 0xD] {
            assert_eq!(2, cin_length(cin), "CIN {cin:#X}");
        }
        for cin in [0x0, 0x1, 0x3, 0x4, 0x7, 0x8, 0x9, 0xA, 0xB, 0xE] {
            assert_eq!(3, cin_length(cin), "CIN {cin:#X}");
        }
    }

    #[test]
    fn encodes_channel_voice_messages() {
        assert_eq!(
            [0x09, 0x90, 0x3C, 0x7F],
            encode_packet(&MidiPacket::new(&[0x90, 0x3C, 0x7F]), 0)
        );
        assert_eq!(
            [0x0C, 0xC5, 0x10, 0x00],
            encode_packet(&MidiPacket::new(&[0xC5, 0x10]), 0)
        );
        assert_eq!(
            [0x0E, 0xE1, 0x00, 0x40],
            encode_packet(&MidiPacket::new(&[0xE1, 0x00, 0x40]), 0)
        );
    }

    #[test]
    fn encodes_system_messages() {
        assert_eq!(
            [0x0F, 0xF8, 0x00, 0x00],
            encode_packet(&MidiPacket::single(0xF8), 0)
        );
        assert_eq!(
            [0x0F, 0xF6, 0x00, 0x00],
            encode_packet(&MidiPacket::single(0xF6), 0)
        );
        assert_eq!(
            [0x02, 0xF1, 0x25, 0x00],
            encode_packet(&MidiPacket::new(&[0xF1, 0x25]), 0)
        );
        assert_eq!(
            [0x03, 0xF2, 0x01, 0x02],
            encode_packet(&MidiPacket::new(&[0xF2, 0x01, 0x02]), 0)
        );
    }

    #[test]
    fn encodes_the_cable_number() {
        assert_eq!(0x29, encode_packet(&MidiPacket::new(&[0x90, 0x3C, 0x7F]), 2)[0]);
    }

    #[test]
    fn encodes_a_chunked_sysex() {
        let payload = [0xF0, 0x7E, 0x01, 0x02, 0x03, 0xF7];
        let events: heapless::Vec<[u8; 4], 4> = sysex_chunks(&payload)
            .map(|chunk| encode_packet(&chunk, 0))
            .collect();
        assert_eq!(
            &[[0x04, 0xF0, 0x7E, 0x01], [0x07, 0x02, 0x03, 0xF7]],
            &events[..]
        );
    }

    #[test]
    fn sysex_end_cin_depends_on_remaining_bytes() {
        assert_eq!(0x05, encode_packet(&MidiPacket::single(0xF7), 0)[0]);
        assert_eq!(0x06, encode_packet(&MidiPacket::new(&[0x03, 0xF7]), 0)[0]);
        assert_eq!(
            0x07,
            encode_packet(&MidiPacket::new(&[0x02, 0x03, 0xF7]), 0)[0]
        );
        assert_eq!(0x06, encode_packet(&MidiPacket::new(&[0xF0, 0xF7]), 0)[0]);
    }

    #[test]
    fn decodes_a_note_on() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        assert_eq!(
            Some(UsbRxEvent::Message(MidiPacket::new(&[0x90, 0x3C, 0x7F]))),
            decoder.decode([0x09, 0x90, 0x3C, 0x7F])
        );
    }

    #[test]
    fn reassembles_a_spanning_sysex() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        assert_eq!(None, decoder.decode([0x04, 0xF0, 0x7E, 0x01]));
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x7E, 0x01, 0x02, 0x03, 0xF7])),
            decoder.decode([0x07, 0x02, 0x03, 0xF7])
        );
    }

    #[test]
    fn preserves_zero_data_bytes_inside_sysex() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x00, 0x00]);
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x00, 0x00, 0x00, 0xF7])),
            decoder.decode([0x06, 0x00, 0xF7, 0x00])
        );
    }

    #[test]
    fn skips_padding_after_the_terminator() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x7E, 0x01]);
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x7E, 0x01, 0xF7])),
            decoder.decode([0x07, 0xF7, 0x00, 0x00])
        );
    }

    #[test]
    fn a_new_sysex_start_abandons_the_open_transfer() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x01, 0x02]);
        decoder.decode([0x04, 0xF0, 0x0A, 0x0B]);
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x0A, 0x0B, 0xF7])),
            decoder.decode([0x05, 0xF7, 0x00, 0x00])
        );
    }

    #[test]
    fn a_single_packet_sysex_abandons_the_open_transfer() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x01, 0x02]);
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x7D, 0xF7])),
            decoder.decode([0x07, 0xF0, 0x7D, 0xF7])
        );
    }

    #[test]
    fn channel_voice_encoding_round_trips_for_every_status() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        for status in 0x80..=0xEF_u8 {
            let length = message::expected_length(status) as usize;
            let bytes = [status, 0x12, 0x34];
            let packet = MidiPacket::new(&bytes[..length]);
            assert_eq!(
                Some(UsbRxEvent::Message(packet)),
                decoder.decode(encode_packet(&packet, 0)),
                "status {status:#X}"
            );
        }
    }

    #[test]
    fn drops_a_continuation_with_no_sysex_open() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        assert_eq!(None, decoder.decode([0x04, 0x01, 0x02, 0x03]));
        assert_eq!(None, decoder.decode([0x05, 0xF7, 0x00, 0x00]));
    }

    #[test]
    fn single_packet_sysex_decodes_whole() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x7D, 0xF7])),
            decoder.decode([0x07, 0xF0, 0x7D, 0xF7])
        );
    }

    #[test]
    fn oversized_sysex_reports_overflow() {
        let mut decoder: UsbMidiDecoder<4> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x01, 0x02]);
        decoder.decode([0x04, 0x03, 0x04, 0x05]);
        assert_eq!(
            Some(UsbRxEvent::SysexOverflow),
            decoder.decode([0x05, 0xF7, 0x00, 0x00])
        );
    }

    #[test]
    fn realtime_passes_through_during_sysex_reassembly() {
        let mut decoder: UsbMidiDecoder<16> = UsbMidiDecoder::new();
        decoder.decode([0x04, 0xF0, 0x7E, 0x01]);
        assert_eq!(
            Some(UsbRxEvent::Message(MidiPacket::single(0xF8))),
            decoder.decode([0x0F, 0xF8, 0x00, 0x00])
        );
        assert_eq!(
            Some(UsbRxEvent::Sysex(&[0xF0, 0x7E, 0x01, 0x02, 0xF7])),
            decoder.decode([0x06, 0x02, 0xF7, 0x00])
        );
    }
}
