//! MIDI-1.0-protocol UMP to MIDI-2.0-protocol UMP.

use heapless::Deque;

use crate::convert::{Transcoder, scale_up};
use crate::ump::{MessageType, UmpPacket};

/// Upgrades Message Type 0x2 (MIDI 1.0 Channel Voice) messages to Message Type 0x4 (MIDI 2.0
/// Channel Voice) with full-resolution data fields. Every other message type passes through
/// unchanged.
#[derive(Debug, Default)]
pub struct UmpToMidi2 {
    output: Deque<UmpPacket, 8>,
}

impl UmpToMidi2 {
    /// Constructs a converter with no pending output.
    pub fn new() -> Self {
        Self::default()
    }

    fn upgrade(&mut self, word: u32) {
        let group = word & 0x0F00_0000;
        let status = ((word >> 16) & 0xFF) as u8;
        let d0 = (word >> 8) & 0x7F;
        let d1 = word & 0x7F;
        let mt4 = ((MessageType::Midi2ChannelVoice as u32) << 28) | group;

        let (word0, word1) = match status & 0xF0 {
            0x80 => (
                mt4 | (u32::from(status) << 16) | (d0 << 8),
                scale_up(d1, 7, 16) << 16,
            ),
            0x90 => {
                if d1 == 0 {
                    // MIDI 1.0 Note On with velocity zero means Note Off; MIDI 2.0 says so
                    // explicitly, with a default release velocity.
                    (
                        mt4 | (u32::from(status & 0x8F) << 16) | (d0 << 8),
                        0x8000_0000,
                    )
                } else {
                    (
                        mt4 | (u32::from(status) << 16) | (d0 << 8),
                        scale_up(d1, 7, 16) << 16,
                    )
                }
            }
            0xA0 | 0xB0 => (
                mt4 | (u32::from(status) << 16) | (d0 << 8),
                scale_up(d1, 7, 32),
            ),
            0xC0 => (mt4 | (u32::from(status) << 16), d0 << 24),
            0xD0 => (mt4 | (u32::from(status) << 16), scale_up(d0, 7, 32)),
            0xE0 => (
                mt4 | (u32::from(status) << 16),
                scale_up((d1 << 7) | d0, 14, 32),
            ),
            _ => return,
        };
        self.output.push_back(UmpPacket::new(&[word0, word1])).ok();
    }
}

impl Transcoder for UmpToMidi2 {
    type Input = UmpPacket;
    type Output = UmpPacket;

    fn feed(&mut self, packet: UmpPacket) {
        if packet.message_type() == MessageType::Midi1ChannelVoice as u8 {
            self.upgrade(packet.words()[0]);
        } else {
            self.output.push_back(packet).ok();
        }
    }

    fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn read_output(&mut self) -> Option<UmpPacket> {
        self.output.pop_front()
    }
}
