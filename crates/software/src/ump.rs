//! Universal MIDI Packet framing (MIDI 2.0 UMP Format specification).
//!
//! A UMP message is one, two, or four 32-bit words; the Message Type in the top nibble of the
//! first word fixes the size. [`UmpPacketAssembler`] regroups a word stream into whole messages,
//! and [`UmpSink`] abstracts the outbound UMP queue so protocol engines can be exercised on the
//! host.

use num_derive::FromPrimitive;

/// UMP Message Type: the top nibble of a message's first word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// Utility messages (NOOP, jitter reduction).
    Utility = 0x0,
    /// System Common and System Real-Time messages.
    System = 0x1,
    /// MIDI 1.0 Channel Voice messages.
    Midi1ChannelVoice = 0x2,
    /// 64-bit Data messages (SysEx7).
    Data64 = 0x3,
    /// MIDI 2.0 Channel Voice messages.
    Midi2ChannelVoice = 0x4,
    /// 128-bit Data messages (SysEx8, Mixed Data Set).
    Data128 = 0x5,
    /// Flex Data messages.
    FlexData = 0xD,
    /// UMP Stream messages (endpoint discovery, function blocks).
    Stream = 0xF,
}

/// Number of 32-bit words in a UMP message with the given Message Type nibble. Reserved types
/// count one word so an unknown message cannot shift the framing of everything after it.
pub const fn word_count(message_type: u8) -> u8 {
    match message_type & 0x0F {
        0x3 | 0x4 => 2,
        0x5 | 0xF => 4,
        _ => 1,
    }
}

/// One complete UMP message: up to four words plus its valid length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UmpPacket {
    words: [u32; 4],
    len: u8,
}

impl UmpPacket {
    /// Builds a packet from up to four words. Excess input is truncated.
    pub fn new(words: &[u32]) -> Self {
        let mut data = [0; 4];
        let len = words.len().min(4);
        data[..len].copy_from_slice(&words[..len]);
        Self {
            words: data,
            len: len as u8,
        }
    }

    /// Builds a one-word packet.
    pub const fn from_word(word: u32) -> Self {
        Self {
            words: [word, 0, 0, 0],
            len: 1,
        }
    }

    /// The valid words of the message.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    /// Number of valid words.
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the packet carries no words.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The Message Type nibble of the first word.
    pub const fn message_type(&self) -> u8 {
        (self.words[0] >> 28) as u8
    }
}

/// Regroups a stream of 32-bit words into complete [`UmpPacket`]s.
///
/// The first word of each message determines how many follow; [`push`][Self::push] returns the
/// finished packet once all its words have arrived.
#[derive(Debug, Default)]
pub struct UmpPacketAssembler {
    words: [u32; 4],
    have: u8,
    need: u8,
}

impl UmpPacketAssembler {
    /// Constructs an assembler awaiting the first word of a message.
    pub const fn new() -> Self {
        Self {
            words: [0; 4],
            have: 0,
            need: 0,
        }
    }

    /// Consumes one word; returns the completed message, if any.
    pub fn push(&mut self, word: u32) -> Option<UmpPacket> {
        if self.have == 0 {
            self.need = word_count((word >> 28) as u8);
        }
        self.words[self.have as usize] = word;
        self.have += 1;
        if self.have < self.need {
            return None;
        }
        let packet = UmpPacket::new(&self.words[..self.need as usize]);
        self.have = 0;
        Some(packet)
    }

    /// Discards a partially assembled message, e.g. after a transport reset.
    pub fn reset(&mut self) {
        self.have = 0;
        self.need = 0;
    }
}

/// Error returned by [`UmpSink::send`] when the outbound queue has no room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SinkFull;

/// Destination for outbound UMP messages.
///
/// The firmware implements this over its USB transmit queue; tests implement it with a plain
/// buffer. [`clear`][UmpSink::clear] empties anything still queued, which the MIDI-CI engine
/// requires before transmitting a Discovery Reply.
pub trait UmpSink {
    /// Queues one message for transmission.
    fn send(&mut self, packet: UmpPacket) -> Result<(), SinkFull>;

    /// Discards every message still queued.
    fn clear(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_matches_the_ump_format_table() {
        for mt in [0x0, 0x1, 0x2, 0x6, 0x7, 0x8, 0x9, 0xA, 0xB, 0xC, 0xD, 0xE] {
            assert_eq!(1, word_count(mt), "MT {mt:#X}");
        }
        assert_eq!(2, word_count(0x3));
        assert_eq!(2, word_count(0x4));
        assert_eq!(4, word_count(0x5));
        assert_eq!(4, word_count(0xF));
    }

    #[test]
    fn assembles_messages_of_each_size() {
        let mut assembler = UmpPacketAssembler::new();
        assert_eq!(
            Some(UmpPacket::from_word(0x2090_3C7F)),
            assembler.push(0x2090_3C7F)
        );

        assert_eq!(None, assembler.push(0x4090_3C00));
        assert_eq!(
            Some(UmpPacket::new(&[0x4090_3C00, 0x7FFF_0000])),
            assembler.push(0x7FFF_0000)
        );

        assert_eq!(None, assembler.push(0xF000_0000));
        assert_eq!(None, assembler.push(1));
        assert_eq!(None, assembler.push(2));
        assert_eq!(
            Some(UmpPacket::new(&[0xF000_0000, 1, 2, 3])),
            assembler.push(3)
        );
    }

    #[test]
    fn reset_discards_a_partial_message() {
        let mut assembler = UmpPacketAssembler::new();
        assert_eq!(None, assembler.push(0xF000_0000));
        assembler.reset();
        assert_eq!(
            Some(UmpPacket::from_word(0x2090_3C7F)),
            assembler.push(0x2090_3C7F)
        );
    }

    #[test]
    fn message_type_is_the_top_nibble() {
        assert_eq!(0xF, UmpPacket::from_word(0xF012_3456).message_type());
        assert_eq!(0x2, UmpPacket::from_word(0x2090_3C7F).message_type());
    }
}
