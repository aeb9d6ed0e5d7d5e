//! MIDI 2.0 mode pipeline.
//!
//! The UART byte stream is transcoded to MIDI 2.0 protocol UMP for the host, and host UMP is
//! transcoded back down to MIDI 1.0 bytes for the instrument. UMP Stream messages and MIDI-CI
//! SysEx addressed to the bridge itself are answered here and never reach the UART.

use defmt::*;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    mode::Async,
    usart::{self, RingBufferedUartRx, UartTx},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Timer, with_timeout};
use embassy_usb::class::midi::{Receiver, Sender};
use num_traits::FromPrimitive as _;
use ump_bridge_lib::{
    ci::{self, DiscoveryEngine},
    convert::{BytestreamToUmp, Transcoder, UmpToBytestream, UmpToMidi2},
    message::{ACTIVE_SENSING_INTERVAL_MS, status},
    stream::{BRIDGE_CONFIG, StreamEngine},
    sysex7::{self, Sysex7Reassembler},
    ump::{MessageType, SinkFull, UmpPacket, UmpPacketAssembler, UmpSink},
};

use crate::{BRIDGE_STATS, Disconnected, UsbDriver, indicator};

/// How long a producer waits on a full channel before dropping the message.
const FORWARD_TIMEOUT: Duration = Duration::from_millis(10);

type UmpChannel = Channel<CriticalSectionRawMutex, UmpPacket, 16>;

/// UMP messages bound for the host.
static UMP_TO_USB: UmpChannel = Channel::new();

/// UMP messages bound for the UART transcoder.
static UMP_TO_UART: UmpChannel = Channel::new();

/// [`UmpSink`] over the USB transmit channel, handed to the protocol engines.
struct UsbTxSink;

impl UmpSink for UsbTxSink {
    fn send(&mut self, packet: UmpPacket) -> Result<(), SinkFull> {
        UMP_TO_USB.try_send(packet).map_err(|_| {
            BRIDGE_STATS.record_queue_full();
            SinkFull
        })
    }

    fn clear(&mut self) {
        while UMP_TO_USB.try_receive().is_ok() {}
    }
}

async fn forward(channel: &UmpChannel, packet: UmpPacket) {
    if with_timeout(FORWARD_TIMEOUT, channel.send(packet))
        .await
        .is_err()
    {
        BRIDGE_STATS.record_queue_full();
    }
}

/// Transcodes the UART byte stream to MIDI 2.0 protocol UMP bound for the host.
#[embassy_executor::task]
pub async fn uart_rx_task(mut rx: RingBufferedUartRx<'static>) -> ! {
    let mut to_ump = BytestreamToUmp::new();
    let mut to_midi2 = UmpToMidi2::new();
    let mut buf = [0u8; 64];
    loop {
        match rx.read(&mut buf).await {
            Ok(n) => {
                BRIDGE_STATS.count_uart_rx(n as u32);
                indicator::flash();
                for &byte in &buf[..n] {
                    // The instrument's keep-alive is line management, not traffic.
                    if byte == status::ACTIVE_SENSING {
                        continue;
                    }
                    to_ump.feed(byte);
                    while let Some(packet) = to_ump.read_output() {
                        to_midi2.feed(packet);
                    }
                    while let Some(packet) = to_midi2.read_output() {
                        forward(&UMP_TO_USB, packet).await;
                    }
                }
            }
            Err(usart::Error::Overrun) => {
                // The ring buffer wrapped; discard converter state along with the torn bytes.
                BRIDGE_STATS.record_dma_overrun();
                to_ump = BytestreamToUmp::new();
            }
            Err(e) => {
                BRIDGE_STATS.record_uart_error();
                warn!("UART receive error: {}", e);
            }
        }
    }
}

/// Transcodes queued UMP back to MIDI 1.0 bytes for the UART, injecting Active Sensing when
/// the line goes quiet.
#[embassy_executor::task]
pub async fn uart_tx_task(mut tx: UartTx<'static, Async>) -> ! {
    let mut converter = UmpToBytestream::new();
    // Largest burst per message is a complete SysEx chunk: F0, six data bytes, F7.
    let mut buf = [0u8; 16];
    loop {
        match select(
            UMP_TO_UART.receive(),
            Timer::after_millis(ACTIVE_SENSING_INTERVAL_MS),
        )
        .await
        {
            Either::First(packet) => {
                converter.feed(packet);
                let mut len = 0;
                while let Some(byte) = converter.read_output() {
                    buf[len] = byte;
                    len += 1;
                }
                if len > 0 {
                    write_uart(&mut tx, &buf[..len]).await;
                }
            }
            Either::Second(()) => {
                write_uart(&mut tx, &[status::ACTIVE_SENSING]).await;
            }
        }
    }
}

async fn write_uart(tx: &mut UartTx<'static, Async>, bytes: &[u8]) {
    match tx.write(bytes).await {
        Ok(()) => {
            BRIDGE_STATS.count_uart_tx(bytes.len() as u32);
            indicator::flash();
        }
        Err(e) => {
            BRIDGE_STATS.record_uart_error();
            warn!("UART transmit error: {}", e);
        }
    }
}

/// Writes queued UMP messages to the IN endpoint, words little-endian, one message per
/// transfer.
#[embassy_executor::task]
pub async fn usb_tx_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    loop {
        sender.wait_connection().await;
        info!("USB connected");
        let _ = send_packets(&mut sender).await;
        info!("USB disconnected");
    }
}

async fn send_packets(sender: &mut Sender<'static, UsbDriver>) -> Result<(), Disconnected> {
    loop {
        let packet = UMP_TO_USB.receive().await;
        let mut bytes = [0u8; 16];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(packet.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        sender.write_packet(&bytes[..packet.len() * 4]).await?;
        BRIDGE_STATS.count_usb_tx(1);
        indicator::flash();
    }
}

/// Reads UMP words from the OUT endpoint, regroups them into messages, and routes each one:
/// Stream messages to the endpoint discovery engine, Data messages through SysEx reassembly
/// (and on to MIDI-CI when the header matches), everything else to the UART transcoder.
#[embassy_executor::task]
pub async fn usb_rx_task(mut receiver: Receiver<'static, UsbDriver>) -> ! {
    let stream_engine = StreamEngine::new(&BRIDGE_CONFIG);
    // The discovery engine outlives reconnects so the MUID stays stable for the host.
    let mut discovery = DiscoveryEngine::new(&BRIDGE_CONFIG);
    loop {
        receiver.wait_connection().await;
        info!("USB connected, MUID {=u32:#x}", discovery.muid());
        let _ = receive_packets(&mut receiver, &stream_engine, &mut discovery).await;
        info!("USB disconnected");
    }
}

async fn receive_packets(
    receiver: &mut Receiver<'static, UsbDriver>,
    stream_engine: &StreamEngine,
    discovery: &mut DiscoveryEngine,
) -> Result<(), Disconnected> {
    let mut assembler = UmpPacketAssembler::new();
    // A SysEx torn by the previous session must not prefix the next one.
    let mut reassembler: Sysex7Reassembler<512> = Sysex7Reassembler::new();
    let mut buf = [0u8; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        indicator::flash();
        for chunk in buf[..n].chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let Some(packet) = assembler.push(word) else {
                continue;
            };
            BRIDGE_STATS.count_usb_rx(1);
            route(&packet, stream_engine, discovery, &mut reassembler).await;
        }
    }
}

async fn route(
    packet: &UmpPacket,
    stream_engine: &StreamEngine,
    discovery: &mut DiscoveryEngine,
    reassembler: &mut Sysex7Reassembler<512>,
) {
    let mut sink = UsbTxSink;
    match MessageType::from_u8(packet.message_type()) {
        Some(MessageType::Stream) => stream_engine.handle(packet, &mut sink),
        Some(MessageType::Data64) => {
            if let Some(sysex) = reassembler.receive(packet) {
                if is_ci_sysex(sysex) {
                    discovery.handle_sysex(sysex, &mut sink);
                } else {
                    for fragment in sysex7::fragment(sysex) {
                        forward(&UMP_TO_UART, fragment).await;
                    }
                }
            }
        }
        _ => forward(&UMP_TO_UART, *packet).await,
    }
}

/// True when a complete SysEx carries the Universal Non-Real-Time MIDI-CI header.
fn is_ci_sysex(sysex: &[u8]) -> bool {
    sysex.len() > 4 && sysex[1] == ci::UNIVERSAL_NON_REALTIME && sysex[3] == ci::CI_SUB_ID
}
