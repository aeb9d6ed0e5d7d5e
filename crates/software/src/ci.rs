//! MIDI-CI Discovery (MIDI Capability Inquiry over Universal SysEx).
//!
//! The bridge answers Discovery only; every other MIDI-CI transaction gets a NAK. The engine
//! holds one piece of state, the device's 28-bit MUID, regenerated when an incoming Discovery
//! carries the same value. Outbound messages are framed as SysEx, fragmented into UMP Data
//! messages, and queued on a [`UmpSink`]; the Discovery Reply drains the sink first so it
//! cannot sit behind stale bridge traffic.

use embassy_time::Instant;
use tinyvec::ArrayVec;

use crate::message::status::{SYSEX_END, SYSEX_START};
use crate::stream::EndpointConfig;
use crate::sysex7;
use crate::ump::UmpSink;

/// A 28-bit Manufacturer Unique ID.
pub type Muid = u32;

/// MIDI-CI message version implemented by this device (1.2).
pub const CI_VERSION: u8 = 0x02;

/// Universal System Exclusive Non-Real Time category byte.
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;

/// Universal SysEx sub-ID#1 for MIDI-CI.
pub const CI_SUB_ID: u8 = 0x0D;

/// Sub-ID#2 values of the transactions this engine knows about.
pub mod sub_id2 {
    /// Discovery request.
    pub const DISCOVERY: u8 = 0x70;
    /// Discovery Reply.
    pub const DISCOVERY_REPLY: u8 = 0x71;
    /// Invalidate MUID notification.
    pub const INVALIDATE_MUID: u8 = 0x7E;
    /// Negative acknowledgment.
    pub const NAK: u8 = 0x7F;
}

/// NAK status code for a transaction this device does not implement.
pub const NAK_STATUS_UNSUPPORTED: u8 = 0x01;

/// The reserved broadcast MUID.
pub const MUID_BROADCAST: Muid = 0x0FFF_FFFF;

const MUID_MASK: u32 = 0x0FFF_FFFF;

/// MUID assigned when generation lands on a reserved value, masked to keep the 28-bit
/// invariant.
pub const MUID_FALLBACK: Muid = 0x1234_5678 & MUID_MASK;

/// Discovery payloads shorter than this (delimiters excluded) are ignored.
pub const MIN_DISCOVERY_LEN: usize = 17;

/// Shorter unknown transactions are ignored instead of NAKed.
pub const MIN_NAK_LEN: usize = 13;

/// Receivable maximum SysEx size advertised in the Discovery Reply, LSB first.
const MAX_SYSEX_SIZE: [u8; 4] = [0x00, 0x02, 0x00, 0x00]; // 512 bytes

/// Generates a MUID from the current tick count mixed with a caller-held sequence counter,
/// never returning zero, the broadcast value, or `avoid`.
pub fn generate_muid(avoid: Muid, seq: &mut u32) -> Muid {
    let mut muid = (Instant::now().as_ticks() as u32).wrapping_add(*seq) & MUID_MASK;
    *seq = seq.wrapping_add(1);
    loop {
        if muid != 0 && muid != MUID_BROADCAST && muid != avoid {
            return muid;
        }
        muid = if muid == 0 || muid == MUID_BROADCAST {
            MUID_FALLBACK
        } else {
            muid.wrapping_add(1) & MUID_MASK
        };
    }
}

fn muid_from_bytes(bytes: &[u8]) -> Muid {
    u32::from(bytes[0] & 0x7F)
        | (u32::from(bytes[1] & 0x7F) << 7)
        | (u32::from(bytes[2] & 0x7F) << 14)
        | (u32::from(bytes[3] & 0x7F) << 21)
}

type CiBuffer = ArrayVec<[u8; 48]>;

fn push_muid(buffer: &mut CiBuffer, muid: Muid) {
    buffer.push((muid & 0x7F) as u8);
    buffer.push(((muid >> 7) & 0x7F) as u8);
    buffer.push(((muid >> 14) & 0x7F) as u8);
    buffer.push(((muid >> 21) & 0x7F) as u8);
}

fn push_header(buffer: &mut CiBuffer, sub_id2: u8) {
    buffer.push(SYSEX_START);
    buffer.push(UNIVERSAL_NON_REALTIME);
    buffer.push(0x7F); // device id: to/from Function Block
    buffer.push(CI_SUB_ID);
    buffer.push(sub_id2);
    buffer.push(CI_VERSION);
}

/// The MIDI-CI Discovery state machine.
#[derive(Debug)]
pub struct DiscoveryEngine {
    config: &'static EndpointConfig,
    muid: Muid,
    seq: u32,
}

impl DiscoveryEngine {
    /// Constructs the engine and claims an initial MUID.
    pub fn new(config: &'static EndpointConfig) -> Self {
        let mut seq = 0;
        let muid = generate_muid(0, &mut seq);
        Self { config, muid, seq }
    }

    /// The MUID this device currently holds.
    pub const fn muid(&self) -> Muid {
        self.muid
    }

    /// Processes one complete SysEx (0xF0…0xF7) that arrived over UMP Data messages. Non-CI
    /// and too-short payloads are ignored.
    pub fn handle_sysex<S: UmpSink>(&mut self, sysex: &[u8], sink: &mut S) {
        let mut body = sysex;
        if body.first() == Some(&SYSEX_START) {
            body = &body[1..];
        }
        if body.last() == Some(&SYSEX_END) {
            body = &body[..body.len() - 1];
        }
        if body.len() < 4 || body[0] != UNIVERSAL_NON_REALTIME || body[2] != CI_SUB_ID {
            return;
        }
        match body[3] {
            sub_id2::DISCOVERY if body.len() >= MIN_DISCOVERY_LEN => {
                let source = muid_from_bytes(&body[5..9]);
                if source == self.muid {
                    // Another device claims our MUID. Pick a new one and tell everyone the old
                    // one is dead.
                    let old = self.muid;
                    self.muid = generate_muid(old, &mut self.seq);
                    self.send_invalidate_muid(old, sink);
                } else {
                    self.send_discovery_reply(source, sink);
                }
            }
            sub_id2::DISCOVERY_REPLY | sub_id2::INVALIDATE_MUID | sub_id2::NAK => {}
            other if body.len() >= MIN_NAK_LEN => {
                let source = muid_from_bytes(&body[5..9]);
                self.send_nak(source, other, NAK_STATUS_UNSUPPORTED, 0, sink);
            }
            _ => {}
        }
    }

    /// Builds and queues the Discovery Reply. The sink is drained first: the reply must reach
    /// the host before any normal traffic already queued.
    fn send_discovery_reply<S: UmpSink>(&self, destination: Muid, sink: &mut S) {
        sink.clear();

        let identity = &self.config.identity;
        let mut message = CiBuffer::new();
        push_header(&mut message, sub_id2::DISCOVERY_REPLY);
        push_muid(&mut message, self.muid);
        push_muid(&mut message, destination);
        message.extend_from_slice(&identity.manufacturer);
        message.push((identity.family & 0x7F) as u8);
        message.push(((identity.family >> 7) & 0x7F) as u8);
        message.push((identity.model & 0x7F) as u8);
        message.push(((identity.model >> 7) & 0x7F) as u8);
        for level in identity.software_revision {
            message.push(level & 0x7F);
        }
        message.push(0x01); // category support: Discovery only
        message.extend_from_slice(&MAX_SYSEX_SIZE);
        message.push(0x00); // initiator output path id
        message.push(0x00); // function block 0
        message.push(SYSEX_END);

        self.send_sysex(&message, sink);
    }

    /// Queues an Invalidate MUID notification for `old_muid`, addressed to the broadcast MUID.
    fn send_invalidate_muid<S: UmpSink>(&self, old_muid: Muid, sink: &mut S) {
        let mut message = CiBuffer::new();
        push_header(&mut message, sub_id2::INVALIDATE_MUID);
        push_muid(&mut message, self.muid);
        push_muid(&mut message, MUID_BROADCAST);
        push_muid(&mut message, old_muid);
        message.push(SYSEX_END);
        self.send_sysex(&message, sink);
    }

    /// Queues a NAK for a transaction this device does not implement.
    fn send_nak<S: UmpSink>(
        &self,
        destination: Muid,
        original_sub_id2: u8,
        status_code: u8,
        status_data: u8,
        sink: &mut S,
    ) {
        let mut message = CiBuffer::new();
        push_header(&mut message, sub_id2::NAK);
        push_muid(&mut message, self.muid);
        push_muid(&mut message, destination);
        message.push(original_sub_id2);
        message.push(status_code);
        message.push(status_data);
        for _ in 0..5 {
            message.push(0x00); // NAK details
        }
        message.push(0x00); // message length LSB
        message.push(0x00); // message length MSB
        message.push(SYSEX_END);
        self.send_sysex(&message, sink);
    }

    fn send_sysex<S: UmpSink>(&self, sysex: &[u8], sink: &mut S) {
        for packet in sysex7::fragment(sysex) {
            sink.send(packet).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BRIDGE_CONFIG;
    use crate::sysex7::Sysex7Reassembler;
    use crate::ump::{SinkFull, UmpPacket};

    #[derive(Default)]
    struct RecordingSink {
        sent: heapless::Vec<UmpPacket, 16>,
        cleared: usize,
    }

    impl UmpSink for RecordingSink {
        fn send(&mut self, packet: UmpPacket) -> Result<(), SinkFull> {
            self.sent.push(packet).map_err(|_| SinkFull)
        }

        fn clear(&mut self) {
            self.sent.clear();
            self.cleared += 1;
        }
    }

    fn reassemble(sink: &RecordingSink) -> heapless::Vec<u8, 64> {
        let mut reassembler: Sysex7Reassembler<64> = Sysex7Reassembler::new();
        let mut out = heapless::Vec::new();
        for packet in &sink.sent {
            if let Some(sysex) = reassembler.receive(packet) {
                out.extend_from_slice(sysex).unwrap();
            }
        }
        out
    }

    fn ci_message(sub_id2: u8, source: Muid, body_len: usize) -> heapless::Vec<u8, 40> {
        let mut message = heapless::Vec::new();
        message
            .extend_from_slice(&[0xF0, 0x7E, 0x7F, 0x0D, sub_id2, CI_VERSION])
            .unwrap();
        message.push(source as u8 & 0x7F).unwrap();
        message.push((source >> 7) as u8 & 0x7F).unwrap();
        message.push((source >> 14) as u8 & 0x7F).unwrap();
        message.push((source >> 21) as u8 & 0x7F).unwrap();
        while message.len() < body_len + 1 {
            message.push(0x00).unwrap();
        }
        message.push(0xF7).unwrap();
        message
    }

    #[test]
    fn generated_muids_avoid_the_reserved_values() {
        let mut seq = 0;
        for _ in 0..100 {
            let muid = generate_muid(0, &mut seq);
            assert_ne!(0, muid);
            assert_ne!(MUID_BROADCAST, muid);
            assert!(muid <= MUID_BROADCAST);
        }
    }

    #[test]
    fn generation_avoids_the_current_muid() {
        let mut seq = 0;
        let current = generate_muid(0, &mut seq);
        for _ in 0..100 {
            assert_ne!(current, generate_muid(current, &mut seq));
        }
    }

    #[test]
    fn discovery_gets_a_reply_addressed_to_the_source() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let muid_before = engine.muid();
        let source: Muid = 0x0ABC_DEF0 & 0x0FFF_FFFF;
        let mut sink = RecordingSink::default();

        engine.handle_sysex(&ci_message(sub_id2::DISCOVERY, source, 20), &mut sink);

        assert_eq!(muid_before, engine.muid());
        assert_eq!(1, sink.cleared);
        let reply = reassemble(&sink);
        assert_eq!(&[0xF0, 0x7E, 0x7F, 0x0D, 0x71, CI_VERSION], &reply[..6]);
        assert_eq!(Some(&0xF7), reply.last());
        // Our MUID, then the destination MUID, both LSB first.
        assert_eq!(muid_before, muid_from_bytes(&reply[6..10]));
        assert_eq!(source, muid_from_bytes(&reply[10..14]));
        // Manufacturer and category-support fields from the device identity.
        assert_eq!(&[0x7D, 0x00, 0x00], &reply[14..17]);
        assert_eq!(0x01, reply[25]);
    }

    #[test]
    fn a_muid_conflict_triggers_regeneration_and_invalidation() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let old_muid = engine.muid();
        let mut sink = RecordingSink::default();

        engine.handle_sysex(&ci_message(sub_id2::DISCOVERY, old_muid, 20), &mut sink);

        assert_ne!(old_muid, engine.muid());
        assert_eq!(0, sink.cleared);
        let message = reassemble(&sink);
        assert_eq!(0x7E, message[4]);
        assert_eq!(engine.muid(), muid_from_bytes(&message[6..10]));
        // Broadcast destination, then the invalidated MUID.
        assert_eq!(MUID_BROADCAST, muid_from_bytes(&message[10..14]));
        assert_eq!(old_muid, muid_from_bytes(&message[14..18]));
    }

    #[test]
    fn unsupported_transactions_are_nakked() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let source: Muid = 0x0123_4567;
        let mut sink = RecordingSink::default();

        engine.handle_sysex(&ci_message(0x7B, source, 16), &mut sink);

        let nak = reassemble(&sink);
        assert_eq!(sub_id2::NAK, nak[4]);
        assert_eq!(source, muid_from_bytes(&nak[10..14]));
        assert_eq!(0x7B, nak[14]);
        assert_eq!(NAK_STATUS_UNSUPPORTED, nak[15]);
    }

    #[test]
    fn short_payloads_are_ignored_silently() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let mut sink = RecordingSink::default();
        engine.handle_sysex(&ci_message(sub_id2::DISCOVERY, 1, 12), &mut sink);
        engine.handle_sysex(&ci_message(0x7B, 1, 9), &mut sink);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn non_ci_sysex_is_ignored() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let mut sink = RecordingSink::default();
        engine.handle_sysex(&[0xF0, 0x7D, 0x01, 0x02, 0x03, 0xF7], &mut sink);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn replies_to_other_engines_are_not_answered() {
        let mut engine = DiscoveryEngine::new(&BRIDGE_CONFIG);
        let mut sink = RecordingSink::default();
        engine.handle_sysex(&ci_message(sub_id2::DISCOVERY_REPLY, 1, 20), &mut sink);
        engine.handle_sysex(&ci_message(sub_id2::INVALIDATE_MUID, 1, 20), &mut sink);
        assert!(sink.sent.is_empty());
    }
}
