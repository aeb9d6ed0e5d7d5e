//! UMP Stream messages (Message Type 0xF): endpoint discovery and function blocks.
//!
//! A Stream message is always 128 bits. Word 0 carries a 2-bit Format (complete, start,
//! continue, end) and a 10-bit Status; the rest is status-specific payload. The
//! [`StreamEngine`] answers inbound Endpoint Discovery, Function Block Discovery, and Stream
//! Configuration requests from a static [`EndpointConfig`], queueing notifications on a
//! [`UmpSink`] in request order.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::ump::{UmpPacket, UmpSink};

/// Status field values for Stream messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamStatus {
    /// Endpoint Discovery request (host to device).
    EndpointDiscovery = 0x00,
    /// Endpoint Info Notification.
    EndpointInfo = 0x01,
    /// Device Identity Notification.
    DeviceIdentity = 0x02,
    /// Endpoint Name Notification.
    EndpointName = 0x03,
    /// Product Instance Id Notification.
    ProductInstanceId = 0x04,
    /// Stream Configuration Request (host to device).
    ConfigRequest = 0x05,
    /// Stream Configuration Notification.
    ConfigNotify = 0x06,
    /// Function Block Discovery request (host to device).
    FunctionBlockDiscovery = 0x10,
    /// Function Block Info Notification.
    FunctionBlockInfo = 0x11,
    /// Function Block Name Notification.
    FunctionBlockName = 0x12,
}

/// Filter bits of an Endpoint Discovery request.
mod discovery_filter {
    pub const ENDPOINT_INFO: u32 = 0x01;
    pub const DEVICE_IDENTITY: u32 = 0x02;
    pub const ENDPOINT_NAME: u32 = 0x04;
    pub const PRODUCT_INSTANCE_ID: u32 = 0x08;
    pub const STREAM_CONFIG: u32 = 0x10;
}

/// Name strings longer than this are truncated before chunking.
pub const MAX_NAME_BYTES: usize = 98;

const BYTES_PER_NAME_CHUNK: usize = 14;
const FB_NAME_BYTES: usize = 13;

/// MIDI-CI identity fields, also reused by the Discovery Reply (see [`crate::ci`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    /// 3-byte SysEx manufacturer id.
    pub manufacturer: [u8; 3],
    /// Device family.
    pub family: u16,
    /// Device model within the family.
    pub model: u16,
    /// Four 7-bit software revision levels.
    pub software_revision: [u8; 4],
}

/// Function block direction field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Direction not declared.
    Unknown = 0,
    /// Input only.
    Input = 1,
    /// Output only.
    Output = 2,
    /// Both directions.
    Bidirectional = 3,
}

/// One function block exposed by the endpoint.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionBlock {
    /// Block id, 0-based.
    pub id: u8,
    /// Whether the block is active.
    pub active: bool,
    /// Data flow direction.
    pub direction: Direction,
    /// First UMP group spanned.
    pub first_group: u8,
    /// Number of groups spanned.
    pub group_count: u8,
    /// MIDI-CI message version supported on this block.
    pub ci_version: u8,
    /// Display name, at most 13 bytes on the wire.
    pub name: &'static str,
}

/// Protocol and jitter-reduction state reported by Stream Configuration Notifications. Fixed
/// for the lifetime of the device; configuration requests are acknowledged but not honored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolStatus {
    /// Protocol id: 0x01 for MIDI 1.0, 0x02 for MIDI 2.0.
    pub protocol: u8,
    /// Receive-side jitter reduction timestamps enabled.
    pub rx_jitter_reduction: bool,
    /// Transmit-side jitter reduction timestamps enabled.
    pub tx_jitter_reduction: bool,
}

/// Static description of this UMP endpoint, fixed at build time.
#[derive(Clone, Copy, Debug)]
pub struct EndpointConfig {
    /// UMP specification version as (major, minor).
    pub ump_version: (u8, u8),
    /// MIDI-CI identity fields.
    pub identity: DeviceIdentity,
    /// Endpoint name.
    pub endpoint_name: &'static str,
    /// Product instance id string.
    pub product_instance_id: &'static str,
    /// The endpoint's function blocks, in ascending id order.
    pub function_blocks: &'static [FunctionBlock],
    /// Whether the function block layout can never change.
    pub static_function_blocks: bool,
    /// MIDI 2.0 protocol capability flag.
    pub supports_midi2: bool,
    /// MIDI 1.0 protocol capability flag.
    pub supports_midi1: bool,
    /// Fixed protocol status reported by configuration notifications.
    pub protocol: ProtocolStatus,
}

/// The bridge's endpoint description.
pub const BRIDGE_CONFIG: EndpointConfig = EndpointConfig {
    ump_version: (0x01, 0x02),
    identity: DeviceIdentity {
        // 0x7D is the educational/development manufacturer id.
        manufacturer: [0x7D, 0x00, 0x00],
        family: 0x0001,
        model: 0x0001,
        software_revision: [1, 0, 0, 0],
    },
    endpoint_name: "USB MIDI 2.0 Converter",
    product_instance_id: "MIDI2USB-001",
    function_blocks: &[FunctionBlock {
        id: 0,
        active: true,
        direction: Direction::Bidirectional,
        first_group: 0,
        group_count: 1,
        ci_version: crate::ci::CI_VERSION,
        name: "Main Port",
    }],
    static_function_blocks: true,
    supports_midi2: true,
    supports_midi1: false,
    protocol: ProtocolStatus {
        protocol: 0x02,
        rx_jitter_reduction: false,
        tx_jitter_reduction: false,
    },
};

const fn word0(format: u8, status: StreamStatus) -> u32 {
    (0xF << 28) | ((format as u32) << 26) | ((status as u32) << 16)
}

fn name_message(status: StreamStatus, format: u8, chunk: &[u8]) -> UmpPacket {
    let mut bytes = [0u8; BYTES_PER_NAME_CHUNK];
    for (dst, src) in bytes.iter_mut().zip(chunk) {
        *dst = src & 0x7F;
    }
    let mut words = [0u32; 4];
    words[0] = word0(format, status) | (u32::from(bytes[0]) << 8) | u32::from(bytes[1]);
    for (i, &byte) in bytes.iter().enumerate().skip(2) {
        let word = 1 + (i - 2) / 4;
        let shift = (3 - ((i - 2) % 4)) * 8;
        words[word] |= u32::from(byte) << shift;
    }
    UmpPacket::new(&words)
}

/// Answers UMP Stream requests from a static endpoint description.
#[derive(Clone, Copy, Debug)]
pub struct StreamEngine {
    config: &'static EndpointConfig,
}

impl StreamEngine {
    /// Constructs an engine over the given endpoint description.
    pub const fn new(config: &'static EndpointConfig) -> Self {
        Self { config }
    }

    /// Processes one inbound Stream message, queueing any requested notifications on `sink` in
    /// request order. Notifications that do not fit the sink are dropped; the sink is expected
    /// to count them.
    pub fn handle<S: UmpSink>(&self, packet: &UmpPacket, sink: &mut S) {
        if packet.message_type() != 0xF || packet.len() < 4 {
            return;
        }
        let status = (packet.words()[0] >> 16) & 0x3FF;
        match StreamStatus::from_u32(status) {
            Some(StreamStatus::EndpointDiscovery) => {
                let filter = packet.words()[1] & 0x1F;
                if filter & discovery_filter::ENDPOINT_INFO != 0 {
                    sink.send(self.endpoint_info()).ok();
                }
                if filter & discovery_filter::DEVICE_IDENTITY != 0 {
                    sink.send(self.device_identity()).ok();
                }
                if filter & discovery_filter::ENDPOINT_NAME != 0 {
                    self.send_name(StreamStatus::EndpointName, self.config.endpoint_name, sink);
                }
                if filter & discovery_filter::PRODUCT_INSTANCE_ID != 0 {
                    self.send_name(
                        StreamStatus::ProductInstanceId,
                        self.config.product_instance_id,
                        sink,
                    );
                }
                if filter & discovery_filter::STREAM_CONFIG != 0 {
                    sink.send(self.config_notification()).ok();
                }
            }
            Some(StreamStatus::ConfigRequest) => {
                // Acknowledged, never honored: the reply always reports the fixed protocol.
                sink.send(self.config_notification()).ok();
            }
            Some(StreamStatus::FunctionBlockDiscovery) => {
                let block_id = ((packet.words()[0] >> 8) & 0xFF) as u8;
                let filter = packet.words()[0] & 0xFF;
                if block_id == 0xFF {
                    for block in self.config.function_blocks {
                        self.send_function_block(block, filter, sink);
                    }
                } else if let Some(block) = self
                    .config
                    .function_blocks
                    .iter()
                    .find(|block| block.id == block_id)
                {
                    self.send_function_block(block, filter, sink);
                }
            }
            _ => {}
        }
    }

    fn send_function_block<S: UmpSink>(&self, block: &FunctionBlock, filter: u32, sink: &mut S) {
        if filter & 0x01 != 0 {
            sink.send(self.function_block_info(block)).ok();
        }
        if filter & 0x02 != 0 {
            sink.send(self.function_block_name(block)).ok();
        }
    }

    /// Builds the Endpoint Info Notification.
    pub fn endpoint_info(&self) -> UmpPacket {
        let config = self.config;
        let head = word0(0, StreamStatus::EndpointInfo)
            | (u32::from(config.ump_version.0) << 8)
            | u32::from(config.ump_version.1);
        let caps = (u32::from(config.static_function_blocks) << 31)
            | ((config.function_blocks.len() as u32) << 24)
            | (u32::from(config.supports_midi2) << 9)
            | (u32::from(config.supports_midi1) << 8)
            | (u32::from(config.protocol.rx_jitter_reduction) << 1)
            | u32::from(config.protocol.tx_jitter_reduction);
        UmpPacket::new(&[head, caps, 0, 0])
    }

    /// Builds the Device Identity Notification.
    pub fn device_identity(&self) -> UmpPacket {
        let identity = &self.config.identity;
        let manufacturer = (u32::from(identity.manufacturer[0]) << 16)
            | (u32::from(identity.manufacturer[1]) << 8)
            | u32::from(identity.manufacturer[2]);
        let family_model = (u32::from(identity.family >> 8) << 24)
            | (u32::from(identity.family & 0xFF) << 16)
            | (u32::from(identity.model >> 8) << 8)
            | u32::from(identity.model & 0xFF);
        let revision = u32::from_be_bytes(identity.software_revision);
        UmpPacket::new(&[
            word0(0, StreamStatus::DeviceIdentity),
            manufacturer,
            family_model,
            revision,
        ])
    }

    /// Builds the Stream Configuration Notification with the fixed protocol status.
    pub fn config_notification(&self) -> UmpPacket {
        let protocol = &self.config.protocol;
        let head = word0(0, StreamStatus::ConfigNotify)
            | (u32::from(protocol.protocol) << 8)
            | (u32::from(protocol.rx_jitter_reduction) << 1)
            | u32::from(protocol.tx_jitter_reduction);
        UmpPacket::new(&[head, 0, 0, 0])
    }

    /// Queues an Endpoint Name or Product Instance Id notification, chunked into 14-byte
    /// messages when the string does not fit one: Start, then Continue for every full middle
    /// chunk, End for the final chunk. Content beyond [`MAX_NAME_BYTES`] is dropped.
    fn send_name<S: UmpSink>(&self, status: StreamStatus, text: &str, sink: &mut S) {
        let bytes = &text.as_bytes()[..text.len().min(MAX_NAME_BYTES)];
        if bytes.len() <= BYTES_PER_NAME_CHUNK {
            sink.send(name_message(status, 0, bytes)).ok();
            return;
        }
        let last = bytes.len().div_ceil(BYTES_PER_NAME_CHUNK) - 1;
        for (index, chunk) in bytes.chunks(BYTES_PER_NAME_CHUNK).enumerate() {
            let format = if index == 0 {
                1
            } else if index == last {
                3
            } else {
                2
            };
            sink.send(name_message(status, format, chunk)).ok();
        }
    }

    /// Builds the Function Block Info Notification for one block.
    pub fn function_block_info(&self, block: &FunctionBlock) -> UmpPacket {
        let head = word0(0, StreamStatus::FunctionBlockInfo)
            | (u32::from(block.active) << 15)
            | (u32::from(block.id) << 8)
            | (1 << 5)
            | (1 << 4)
            | (block.direction as u32 & 0x3);
        let groups = (u32::from(block.first_group) << 24)
            | (u32::from(block.group_count) << 16)
            | (u32::from(block.ci_version) << 8);
        UmpPacket::new(&[head, groups, 0, 0])
    }

    /// Builds the Function Block Name Notification. The name always fits one message; anything
    /// beyond 13 bytes is truncated.
    pub fn function_block_name(&self, block: &FunctionBlock) -> UmpPacket {
        let mut bytes = [0u8; FB_NAME_BYTES];
        for (dst, src) in bytes.iter_mut().zip(block.name.as_bytes()) {
            *dst = src & 0x7F;
        }
        let mut words = [0u32; 4];
        words[0] = word0(0, StreamStatus::FunctionBlockName)
            | (u32::from(block.id) << 8)
            | u32::from(bytes[0]);
        for (i, &byte) in bytes.iter().enumerate().skip(1) {
            let word = 1 + (i - 1) / 4;
            let shift = (3 - ((i - 1) % 4)) * 8;
            words[word] |= u32::from(byte) << shift;
        }
        UmpPacket::new(&words)
    }
}
