//! SysEx7 transport over 64-bit UMP Data messages (Message Type 0x3).
//!
//! Each Data message carries a start/continue/end status, a byte count, and up to six 7-bit
//! payload bytes; the 0xF0/0xF7 delimiters of the byte-stream form are never transmitted.
//! [`fragment`] turns a delimited SysEx buffer into the message sequence; [`Sysex7Reassembler`]
//! rebuilds the delimited buffer on receipt so the result can go straight to a UART or into the
//! MIDI-CI engine.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::message::status::{SYSEX_END, SYSEX_START};
use crate::sysex::SysexAccumulator;
use crate::ump::{MessageType, UmpPacket};

/// Status nibble of a 64-bit UMP Data message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sysex7Status {
    /// The entire SysEx fits in this one message.
    Complete = 0x0,
    /// First message of a multi-message SysEx.
    Start = 0x1,
    /// Middle message.
    Continue = 0x2,
    /// Final message.
    End = 0x3,
}

/// Maximum payload bytes per Data message.
pub const BYTES_PER_MESSAGE: usize = 6;

/// Packs up to six payload bytes into one 64-bit Data message on group 0. `chunk` must not
/// contain the SysEx delimiters.
pub fn data_message(status: Sysex7Status, chunk: &[u8]) -> UmpPacket {
    let mut bytes = [0u8; BYTES_PER_MESSAGE];
    bytes[..chunk.len()].copy_from_slice(chunk);
    let word0 = ((MessageType::Data64 as u32) << 28)
        | ((status as u32) << 20)
        | ((chunk.len() as u32) << 16)
        | (u32::from(bytes[0]) << 8)
        | u32::from(bytes[1]);
    let word1 = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    UmpPacket::new(&[word0, word1])
}

/// Fragments a SysEx buffer (with or without its 0xF0/0xF7 delimiters) into UMP Data messages
/// on group 0.
pub fn fragment(payload: &[u8]) -> Sysex7Fragments<'_> {
    let mut body = payload;
    if body.first() == Some(&SYSEX_START) {
        body = &body[1..];
    }
    if body.last() == Some(&SYSEX_END) {
        body = &body[..body.len() - 1];
    }
    Sysex7Fragments {
        rest: body,
        first: true,
        done: false,
    }
}

/// Iterator of Data messages produced by [`fragment`].
#[derive(Debug)]
pub struct Sysex7Fragments<'a> {
    rest: &'a [u8],
    first: bool,
    done: bool,
}

impl Iterator for Sysex7Fragments<'_> {
    type Item = UmpPacket;

    fn next(&mut self) -> Option<UmpPacket> {
        if self.done {
            return None;
        }
        let take = self.rest.len().min(BYTES_PER_MESSAGE);
        let (chunk, rest) = self.rest.split_at(take);
        self.rest = rest;
        let status = match (self.first, rest.is_empty()) {
            (true, true) => Sysex7Status::Complete,
            (true, false) => Sysex7Status::Start,
            (false, false) => Sysex7Status::Continue,
            (false, true) => Sysex7Status::End,
        };
        self.first = false;
        self.done = rest.is_empty();
        Some(data_message(status, chunk))
    }
}

/// Rebuilds delimited SysEx buffers from received UMP Data messages, up to `N` bytes including
/// the re-added 0xF0/0xF7 delimiters.
#[derive(Debug, Default)]
pub struct Sysex7Reassembler<const N: usize = 256> {
    buffer: SysexAccumulator<N>,
}

impl<const N: usize> Sysex7Reassembler<N> {
    /// Constructs a reassembler with nothing in progress.
    pub fn new() -> Self {
        Self {
            buffer: SysexAccumulator::new(),
        }
    }

    /// Consumes one UMP message. Returns the complete delimited SysEx when the final Data
    /// message arrives; overflowed or out-of-sequence input is discarded silently.
    pub fn receive(&mut self, packet: &UmpPacket) -> Option<&[u8]> {
        if packet.message_type() != MessageType::Data64 as u8 || packet.len() < 2 {
            return None;
        }
        let word0 = packet.words()[0];
        let status = Sysex7Status::from_u32((word0 >> 20) & 0xF)?;
        let count = (((word0 >> 16) & 0xF) as usize).min(BYTES_PER_MESSAGE);
        let bytes = [
            (word0 >> 8) as u8,
            word0 as u8,
            (packet.words()[1] >> 24) as u8,
            (packet.words()[1] >> 16) as u8,
            (packet.words()[1] >> 8) as u8,
            packet.words()[1] as u8,
        ];

        match status {
            Sysex7Status::Complete | Sysex7Status::Start => {
                self.buffer.begin();
                self.buffer.push(SYSEX_START);
            }
            Sysex7Status::Continue | Sysex7Status::End => {
                if !self.buffer.is_in_progress() {
                    return None;
                }
            }
        }
        for &byte in &bytes[..count] {
            self.buffer.push(byte);
        }
        match status {
            Sysex7Status::Complete | Sysex7Status::End => {
                self.buffer.push(SYSEX_END);
                self.buffer.finish()
            }
            _ => None,
        }
    }
}
