//! MIDI 1.0 byte stream to MIDI-1.0-protocol UMP.

use heapless::Deque;

use crate::convert::Transcoder;
use crate::message::{self, status};
use crate::sysex7::{self, BYTES_PER_MESSAGE, Sysex7Status};
use crate::ump::{MessageType, UmpPacket};

fn system_word(status: u8, d0: u8, d1: u8) -> UmpPacket {
    UmpPacket::from_word(
        ((MessageType::System as u32) << 28)
            | (u32::from(status) << 16)
            | (u32::from(d0) << 8)
            | u32::from(d1),
    )
}

fn channel_word(status: u8, d0: u8, d1: u8) -> UmpPacket {
    UmpPacket::from_word(
        ((MessageType::Midi1ChannelVoice as u32) << 28)
            | (u32::from(status) << 16)
            | (u32::from(d0) << 8)
            | u32::from(d1),
    )
}

/// Converts a MIDI 1.0 byte stream into MIDI-1.0-protocol UMP messages on group 0.
///
/// Channel Voice and System Common messages become one 32-bit message each (Message Types 0x2
/// and 0x1); SysEx streams become 64-bit Data messages, flushed six payload bytes at a time so
/// arbitrarily long transfers need no buffer proportional to their length.
#[derive(Debug, Default)]
pub struct BytestreamToUmp {
    status: u8,
    needed: u8,
    data: [u8; 2],
    have: u8,
    in_sysex: bool,
    chunk: [u8; BYTES_PER_MESSAGE],
    chunk_len: u8,
    first_chunk: bool,
    output: Deque<UmpPacket, 8>,
}

impl BytestreamToUmp {
    /// Constructs a converter in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, packet: UmpPacket) {
        self.output.push_back(packet).ok();
    }
}

impl Transcoder for BytestreamToUmp {
    type Input = u8;
    type Output = UmpPacket;

    fn feed(&mut self, byte: u8) {
        if message::is_realtime(byte) {
            self.emit(system_word(byte, 0, 0));
            return;
        }
        if byte == status::SYSEX_START {
            self.in_sysex = true;
            self.chunk_len = 0;
            self.first_chunk = true;
            self.status = 0;
            return;
        }
        if byte == status::SYSEX_END {
            if self.in_sysex {
                let status = if self.first_chunk {
                    Sysex7Status::Complete
                } else {
                    Sysex7Status::End
                };
                let packet =
                    sysex7::data_message(status, &self.chunk[..self.chunk_len as usize]);
                self.emit(packet);
                self.in_sysex = false;
            }
            return;
        }
        if message::is_status(byte) {
            self.in_sysex = false;
            self.have = 0;
            self.needed = message::expected_length(byte) - 1;
            if self.needed == 0 {
                self.emit(system_word(byte, 0, 0));
                self.status = 0;
            } else {
                self.status = byte;
            }
            return;
        }

        // Data byte.
        if self.in_sysex {
            if self.chunk_len as usize == BYTES_PER_MESSAGE {
                // More data follows the full chunk, so it was not the last one.
                let status = if self.first_chunk {
                    Sysex7Status::Start
                } else {
                    Sysex7Status::Continue
                };
                let packet = sysex7::data_message(status, &self.chunk);
                self.emit(packet);
                self.first_chunk = false;
                self.chunk_len = 0;
            }
            self.chunk[self.chunk_len as usize] = byte;
            self.chunk_len += 1;
            return;
        }
        if self.status == 0 {
            return;
        }
        self.data[self.have as usize] = byte;
        self.have += 1;
        if self.have == self.needed {
            let d1 = if self.needed > 1 { self.data[1] } else { 0 };
            let packet = if self.status >= 0xF0 {
                system_word(self.status, self.data[0], d1)
            } else {
                channel_word(self.status, self.data[0], d1)
            };
            self.emit(packet);
            // Running status: keep the status byte armed for the next data bytes.
            self.have = 0;
            if self.status >= 0xF0 {
                self.status = 0;
            }
        }
    }

    fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn read_output(&mut self) -> Option<UmpPacket> {
        self.output.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(converter: &mut BytestreamToUmp) -> heapless::Vec<UmpPacket, 8> {
        let mut out = heapless::Vec::new();
        while let Some(packet) = converter.read_output() {
            out.push(packet).unwrap();
        }
        out
    }

    fn feed_all(converter: &mut BytestreamToUmp, bytes: &[u8]) {
        for &byte in bytes {
            converter.feed(byte);
        }
    }

    #[test]
    fn converts_a_note_on() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0x90, 0x3C, 0x7F]);
        assert_eq!(
            &[UmpPacket::from_word(0x2090_3C7F)],
            &drain(&mut converter)[..]
        );
    }

    #[test]
    fn honors_running_status() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0x90, 0x3C, 0x7F, 0x3E, 0x40]);
        assert_eq!(
            &[
                UmpPacket::from_word(0x2090_3C7F),
                UmpPacket::from_word(0x2090_3E40),
            ],
            &drain(&mut converter)[..]
        );
    }

    #[test]
    fn converts_system_messages() {
        let mut converter = BytestreamToUmp::new();
        converter.feed(0xF8);
        feed_all(&mut converter, &[0xF2, 0x01, 0x02]);
        converter.feed(0xF6);
        assert_eq!(
            &[
                UmpPacket::from_word(0x10F8_0000),
                UmpPacket::from_word(0x10F2_0102),
                UmpPacket::from_word(0x10F6_0000),
            ],
            &drain(&mut converter)[..]
        );
    }

    #[test]
    fn a_short_sysex_becomes_one_complete_data_message() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0xF0, 0x7E, 0x09, 0x01, 0xF7]);
        assert_eq!(
            &[UmpPacket::new(&[0x3003_7E09, 0x0100_0000])],
            &drain(&mut converter)[..]
        );
    }

    #[test]
    fn a_long_sysex_streams_start_then_end() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0xF0, 1, 2, 3, 4, 5, 6, 7, 8, 0xF7]);
        let out = drain(&mut converter);
        assert_eq!(2, out.len());
        assert_eq!(0x1, (out[0].words()[0] >> 20) & 0xF);
        assert_eq!(6, (out[0].words()[0] >> 16) & 0xF);
        assert_eq!(0x3, (out[1].words()[0] >> 20) & 0xF);
        assert_eq!(2, (out[1].words()[0] >> 16) & 0xF);
    }

    #[test]
    fn realtime_inside_a_sysex_is_emitted_immediately() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0xF0, 0x7E]);
        converter.feed(0xF8);
        assert_eq!(
            Some(UmpPacket::from_word(0x10F8_0000)),
            converter.read_output()
        );
        feed_all(&mut converter, &[0x09, 0xF7]);
        let out = drain(&mut converter);
        assert_eq!(1, out.len());
        assert_eq!(0x0, (out[0].words()[0] >> 20) & 0xF);
    }

    #[test]
    fn orphan_data_bytes_produce_nothing() {
        let mut converter = BytestreamToUmp::new();
        feed_all(&mut converter, &[0x12, 0x34]);
        assert!(!converter.has_output());
    }
}
