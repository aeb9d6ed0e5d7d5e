//! MIDI 1.0 mode pipeline.
//!
//! Two directions, each a pair of tasks joined by a channel so a stalled USB host can never
//! block the UART (or the other way round). UART bytes are parsed into complete messages and
//! framed as USB-MIDI event packets; event packets from the host are unpacked back into bytes.

use defmt::*;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    mode::Async,
    usart::{self, RingBufferedUartRx, UartTx},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Timer, with_timeout};
use embassy_usb::class::midi::{Receiver, Sender};
use ump_bridge_lib::{
    message::{ACTIVE_SENSING_INTERVAL_MS, MidiPacket, status},
    parser::{self, Midi1Parser, MidiEvent},
    usb_midi::{self, UsbMidiDecoder, UsbRxEvent},
};

use crate::{BRIDGE_STATS, Disconnected, UsbDriver, indicator};

/// How long a producer waits on a full channel before dropping the message. Long enough to
/// ride out a USB frame, short enough that the UART ring buffer cannot overrun behind it.
const FORWARD_TIMEOUT: Duration = Duration::from_millis(10);

type PacketChannel = Channel<CriticalSectionRawMutex, MidiPacket, 64>;

/// Messages parsed off the UART, waiting for the USB sender.
static UART_TO_USB: PacketChannel = Channel::new();

/// Messages decoded from USB event packets, waiting for the UART writer.
static USB_TO_UART: PacketChannel = Channel::new();

async fn forward(channel: &PacketChannel, packet: MidiPacket) {
    if with_timeout(FORWARD_TIMEOUT, channel.send(packet))
        .await
        .is_err()
    {
        BRIDGE_STATS.record_queue_full();
    }
}

/// Parses the UART byte stream into complete messages bound for the USB sender.
#[embassy_executor::task]
pub async fn uart_rx_task(mut rx: RingBufferedUartRx<'static>) -> ! {
    let mut parser: Midi1Parser = Midi1Parser::new();
    let mut buf = [0u8; 64];
    loop {
        match rx.read(&mut buf).await {
            Ok(n) => {
                BRIDGE_STATS.count_uart_rx(n as u32);
                indicator::flash();
                for &byte in &buf[..n] {
                    match parser.feed(byte) {
                        Some(MidiEvent::Message(packet)) => forward(&UART_TO_USB, packet).await,
                        Some(MidiEvent::Sysex(payload)) => {
                            for packet in parser::sysex_chunks(payload) {
                                forward(&UART_TO_USB, packet).await;
                            }
                        }
                        Some(MidiEvent::SysexOverflow) => {
                            warn!("SysEx transfer exceeded the receive buffer, dropped");
                        }
                        None => {}
                    }
                }
            }
            Err(usart::Error::Overrun) => {
                // The ring buffer wrapped; whatever message was mid-flight is torn.
                BRIDGE_STATS.record_dma_overrun();
                parser.resync();
            }
            Err(e) => {
                BRIDGE_STATS.record_uart_error();
                warn!("UART receive error: {}", e);
            }
        }
    }
}

/// Writes decoded messages to the UART, injecting Active Sensing when the line goes quiet.
#[embassy_executor::task]
pub async fn uart_tx_task(mut tx: UartTx<'static, Async>) -> ! {
    loop {
        let packet = match select(
            USB_TO_UART.receive(),
            Timer::after_millis(ACTIVE_SENSING_INTERVAL_MS),
        )
        .await
        {
            Either::First(packet) => packet,
            Either::Second(()) => MidiPacket::single(status::ACTIVE_SENSING),
        };
        write_uart(&mut tx, packet.bytes()).await;
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

/// Frames queued messages as USB-MIDI event packets on the IN endpoint.
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
        let packet = UART_TO_USB.receive().await;
        sender
            .write_packet(&usb_midi::encode_packet(&packet, 0))
            .await?;
        BRIDGE_STATS.count_usb_tx(1);
        indicator::flash();
    }
}

/// Unpacks USB-MIDI event packets from the OUT endpoint into messages for the UART writer.
#[embassy_executor::task]
pub async fn usb_rx_task(mut receiver: Receiver<'static, UsbDriver>) -> ! {
    loop {
        receiver.wait_connection().await;
        let _ = receive_packets(&mut receiver).await;
    }
}

async fn receive_packets(receiver: &mut Receiver<'static, UsbDriver>) -> Result<(), Disconnected> {
    let mut decoder: UsbMidiDecoder = UsbMidiDecoder::new();
    let mut buf = [0u8; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        BRIDGE_STATS.count_usb_rx((n / 4) as u32);
        indicator::flash();
        for event in buf[..n].chunks_exact(4) {
            match decoder.decode([event[0], event[1], event[2], event[3]]) {
                Some(UsbRxEvent::Message(packet)) => forward(&USB_TO_UART, packet).await,
                Some(UsbRxEvent::Sysex(payload)) => {
                    for packet in parser::sysex_chunks(payload) {
                        forward(&USB_TO_UART, packet).await;
                    }
                }
                Some(UsbRxEvent::SysexOverflow) => {
                    warn!("SysEx transfer exceeded the receive buffer, dropped");
                }
                None => {}
            }
        }
    }
}
