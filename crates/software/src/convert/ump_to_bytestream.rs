//! Any UMP back down to a MIDI 1.0 byte stream.

use heapless::Deque;

use crate::convert::{Transcoder, scale_down};
use crate::message::{self, status};
use crate::sysex7::{BYTES_PER_MESSAGE, Sysex7Status};
use crate::ump::{MessageType, UmpPacket};
use num_traits::FromPrimitive as _;

/// Converts UMP messages into the MIDI 1.0 bytes a legacy UART device understands.
///
/// MIDI 2.0 Channel Voice messages are narrowed with [`scale_down`]; Data messages are
/// re-framed as 0xF0…0xF7 byte streams without buffering the whole transfer; Utility, Stream,
/// and other non-translatable messages are dropped.
#[derive(Debug, Default)]
pub struct UmpToBytestream {
    in_sysex: bool,
    output: Deque<u8, 16>,
}

impl UmpToBytestream {
    /// Constructs a converter with no pending output.
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, byte: u8) {
        self.output.push_back(byte).ok();
    }

    fn emit_message(&mut self, word: u32) {
        let status = ((word >> 16) & 0xFF) as u8;
        self.emit(status);
        let length = message::expected_length(status);
        if length >= 2 {
            self.emit(((word >> 8) & 0x7F) as u8);
        }
        if length >= 3 {
            self.emit((word & 0x7F) as u8);
        }
    }

    fn emit_sysex(&mut self, packet: &UmpPacket) {
        if packet.len() < 2 {
            return;
        }
        let word0 = packet.words()[0];
        let word1 = packet.words()[1];
        let Some(chunk_status) = Sysex7Status::from_u32((word0 >> 20) & 0xF) else {
            return;
        };
        let count = (((word0 >> 16) & 0xF) as usize).min(BYTES_PER_MESSAGE);
        let bytes = [
            (word0 >> 8) as u8,
            word0 as u8,
            (word1 >> 24) as u8,
            (word1 >> 16) as u8,
            (word1 >> 8) as u8,
            word1 as u8,
        ];

        match chunk_status {
            Sysex7Status::Complete | Sysex7Status::Start => {
                self.emit(status::SYSEX_START);
                self.in_sysex = chunk_status == Sysex7Status::Start;
            }
            Sysex7Status::Continue | Sysex7Status::End => {
                if !self.in_sysex {
                    return;
                }
            }
        }
        for &byte in &bytes[..count] {
            self.emit(byte);
        }
        if matches!(chunk_status, Sysex7Status::Complete | Sysex7Status::End) {
            self.emit(status::SYSEX_END);
            self.in_sysex = false;
        }
    }

    fn downgrade(&mut self, packet: &UmpPacket) {
        if packet.len() < 2 {
            return;
        }
        let word0 = packet.words()[0];
        let word1 = packet.words()[1];
        let status = ((word0 >> 16) & 0xFF) as u8;
        let index = ((word0 >> 8) & 0x7F) as u8;
        match status & 0xF0 {
            0x80 => {
                let velocity = scale_down(word1 >> 16, 16, 7) as u8;
                self.emit(status);
                self.emit(index);
                self.emit(velocity);
            }
            0x90 => {
                let mut velocity = scale_down(word1 >> 16, 16, 7) as u8;
                if velocity == 0 {
                    // A nonzero MIDI 2.0 velocity must not narrow into a Note Off.
                    velocity = 1;
                }
                self.emit(status);
                self.emit(index);
                self.emit(velocity);
            }
            0xA0 | 0xB0 => {
                self.emit(status);
                self.emit(index);
                self.emit(scale_down(word1, 32, 7) as u8);
            }
            0xC0 => {
                self.emit(status);
                self.emit(((word1 >> 24) & 0x7F) as u8);
            }
            0xD0 => {
                self.emit(status);
                self.emit(scale_down(word1, 32, 7) as u8);
            }
            0xE0 => {
                let value = scale_down(word1, 32, 14);
                self.emit(status);
                self.emit((value & 0x7F) as u8);
                self.emit((value >> 7) as u8);
            }
            // Per-note and registered-controller messages have no MIDI 1.0 form.
            _ => {}
        }
    }
}

impl Transcoder for UmpToBytestream {
    type Input = UmpPacket;
    type Output = u8;

    fn feed(&mut self, packet: UmpPacket) {
        match MessageType::from_u8(packet.message_type()) {
            Some(MessageType::System) | Some(MessageType::Midi1ChannelVoice) => {
                self.emit_message(packet.words()[0]);
            }
            Some(MessageType::Data64) => self.emit_sysex(&packet),
            Some(MessageType::Midi2ChannelVoice) => self.downgrade(&packet),
            _ => {}
        }
    }

    fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn read_output(&mut self) -> Option<u8> {
        self.output.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(converter: &mut UmpToBytestream) -> heapless::Vec<u8, 32> {
        let mut out = heapless::Vec::new();
        while let Some(byte) = converter.read_output() {
            out.push(byte).unwrap();
        }
        out
    }

    fn convert(packets: &[UmpPacket]) -> heapless::Vec<u8, 32> {
        let mut converter = UmpToBytestream::new();
        for &packet in packets {
            converter.feed(packet);
        }
        drain(&mut converter)
    }

    #[test]
    fn unpacks_midi1_channel_voice_words() {
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            &convert(&[UmpPacket::from_word(0x2090_3C7F)])[..]
        );
        assert_eq!(
            &[0xC5, 0x10],
            &convert(&[UmpPacket::from_word(0x20C5_1000)])[..]
        );
    }

    #[test]
    fn unpacks_system_words() {
        assert_eq!(&[0xF8], &convert(&[UmpPacket::from_word(0x10F8_0000)])[..]);
        assert_eq!(
            &[0xF2, 0x01, 0x02],
            &convert(&[UmpPacket::from_word(0x10F2_0102)])[..]
        );
    }

    #[test]
    fn downgrades_note_on() {
        assert_eq!(
            &[0x90, 0x3C, 0x7F],
            &convert(&[UmpPacket::new(&[0x4090_3C00, 0xFFFF_0000])])[..]
        );
    }

    #[test]
    fn a_tiny_nonzero_velocity_never_becomes_note_off() {
        assert_eq!(
            &[0x90, 0x3C, 0x01],
            &convert(&[UmpPacket::new(&[0x4090_3C00, 0x0001_0000])])[..]
        );
    }

    #[test]
    fn downgrades_controllers_and_pitch_bend() {
        assert_eq!(
            &[0xB0, 0x07, 0x40],
            &convert(&[UmpPacket::new(&[0x40B0_0700, 0x8000_0000])])[..]
        );
        assert_eq!(
            &[0xE0, 0x00, 0x40],
            &convert(&[UmpPacket::new(&[0x40E0_0000, 0x8000_0000])])[..]
        );
        assert_eq!(
            &[0xC5, 0x05],
            &convert(&[UmpPacket::new(&[0x40C5_0000, 0x0500_0000])])[..]
        );
        assert_eq!(
            &[0xD3, 0x40],
            &convert(&[UmpPacket::new(&[0x40D3_0000, 0x8000_0000])])[..]
        );
    }

    #[test]
    fn reframes_sysex_data_messages() {
        assert_eq!(
            &[0xF0, 0x7E, 0x09, 0x01, 0xF7],
            &convert(&[UmpPacket::new(&[0x3003_7E09, 0x0100_0000])])[..]
        );
    }

    #[test]
    fn streams_multi_message_sysex() {
        let mut converter = UmpToBytestream::new();
        converter.feed(UmpPacket::new(&[0x3016_0102, 0x0304_0506]));
        assert_eq!(&[0xF0, 1, 2, 3, 4, 5, 6], &drain(&mut converter)[..]);
        converter.feed(UmpPacket::new(&[0x3032_0708, 0x0000_0000]));
        assert_eq!(&[7, 8, 0xF7], &drain(&mut converter)[..]);
    }

    #[test]
    fn stray_sysex_continuation_is_dropped() {
        assert!(convert(&[UmpPacket::new(&[0x3032_0708, 0x0000_0000])]).is_empty());
    }

    #[test]
    fn untranslatable_message_types_are_dropped() {
        assert!(convert(&[UmpPacket::from_word(0x0000_0000)]).is_empty());
        assert!(convert(&[UmpPacket::new(&[0xF000_0000, 0, 0, 0])]).is_empty());
    }
}
