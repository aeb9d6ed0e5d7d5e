//! Bridge traffic and error counters.
//!
//! One [`BridgeStats`] lives in a `static` and is shared by every pipeline task. All counters
//! are relaxed atomics: they are diagnostic tallies, not synchronization, and incrementing one
//! must never stall a pipeline.

use core::sync::atomic::{AtomicU32, Ordering};

/// Traffic and error counters for the whole bridge.
#[derive(Debug, Default)]
pub struct BridgeStats {
    uart_rx_bytes: AtomicU32,
    uart_tx_bytes: AtomicU32,
    uart_errors: AtomicU32,
    usb_rx_packets: AtomicU32,
    usb_tx_packets: AtomicU32,
    usb_errors: AtomicU32,
    dma_overruns: AtomicU32,
    queue_full_errors: AtomicU32,
}

impl BridgeStats {
    /// Constructs a zeroed counter set, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            uart_rx_bytes: AtomicU32::new(0),
            uart_tx_bytes: AtomicU32::new(0),
            uart_errors: AtomicU32::new(0),
            usb_rx_packets: AtomicU32::new(0),
            usb_tx_packets: AtomicU32::new(0),
            usb_errors: AtomicU32::new(0),
            dma_overruns: AtomicU32::new(0),
            queue_full_errors: AtomicU32::new(0),
        }
    }

    /// Adds `n` bytes received on the UART.
    pub fn count_uart_rx(&self, n: u32) {
        self.uart_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Adds `n` bytes transmitted on the UART.
    pub fn count_uart_tx(&self, n: u32) {
        self.uart_tx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Records one UART-level error (framing, parity, transmit failure).
    pub fn record_uart_error(&self) {
        self.uart_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` packets received on the USB endpoint.
    pub fn count_usb_rx(&self, n: u32) {
        self.usb_rx_packets.fetch_add(n, Ordering::Relaxed);
    }

    /// Adds `n` packets transmitted on the USB endpoint.
    pub fn count_usb_tx(&self, n: u32) {
        self.usb_tx_packets.fetch_add(n, Ordering::Relaxed);
    }

    /// Records one USB transfer error.
    pub fn record_usb_error(&self) {
        self.usb_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one UART DMA ring-buffer overrun.
    pub fn record_dma_overrun(&self) {
        self.dma_overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one message dropped because an internal queue was full.
    pub fn record_queue_full(&self) {
        self.queue_full_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter. Individual loads are atomic; the set is not a single consistent
    /// cut, which is fine for diagnostics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uart_rx_bytes: self.uart_rx_bytes.load(Ordering::Relaxed),
            uart_tx_bytes: self.uart_tx_bytes.load(Ordering::Relaxed),
            uart_errors: self.uart_errors.load(Ordering::Relaxed),
            usb_rx_packets: self.usb_rx_packets.load(Ordering::Relaxed),
            usb_tx_packets: self.usb_tx_packets.load(Ordering::Relaxed),
            usb_errors: self.usb_errors.load(Ordering::Relaxed),
            dma_overruns: self.dma_overruns.load(Ordering::Relaxed),
            queue_full_errors: self.queue_full_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the bridge counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Bytes received on the UART.
    pub uart_rx_bytes: u32,
    /// Bytes transmitted on the UART.
    pub uart_tx_bytes: u32,
    /// UART-level errors.
    pub uart_errors: u32,
    /// Packets received on the USB endpoint.
    pub usb_rx_packets: u32,
    /// Packets transmitted on the USB endpoint.
    pub usb_tx_packets: u32,
    /// USB transfer errors.
    pub usb_errors: u32,
    /// UART DMA ring-buffer overruns.
    pub dma_overruns: u32,
    /// Messages dropped because an internal queue was full.
    pub queue_full_errors: u32,
}
