//! [Embassy](https://embassy.dev)-based firmware for a USB to UART MIDI bridge running on the
//! [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html).
//!
//! The bridge connects a legacy MIDI 1.0 instrument on a DIN/UART port to a USB host, in one
//! of two operating modes selected by a jumper at boot:
//!
//! - **MIDI 1.0 mode**: the UART byte stream is framed as classic USB-MIDI event packets, and
//!   event packets from the host are unpacked back to bytes. See [`midi1`].
//! - **MIDI 2.0 mode**: the byte stream is transcoded to MIDI 2.0 protocol Universal MIDI
//!   Packets, and the firmware answers UMP Endpoint Discovery and MIDI-CI Discovery on its own
//!   behalf. See [`midi2`].
//!
//! All protocol logic lives in `ump_bridge_lib`, which is host-testable; this crate only wires
//! it to the board's peripherals.

#![no_std]
#![no_main]

mod indicator;
mod midi1;
mod midi2;

use defmt::{panic, *};
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    gpio::{Input, Level, Output, Pull, Speed},
    peripherals,
    time::Hertz,
    usart::{self, Uart},
    usb,
};
use embassy_time::Timer;
use embassy_usb::{Builder, UsbDevice, class::midi::MidiClass, driver::EndpointError};
use static_cell::StaticCell;
use ump_bridge_lib::{mode::OperatingMode, stats::BridgeStats};

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART6 => usart::InterruptHandler<peripherals::USART6>;
    }
);

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// Traffic and error counters shared by every pipeline task.
static BRIDGE_STATS: BridgeStats = BridgeStats::new();

/// The MIDI 1.0 electrical spec rate.
const MIDI_BAUD: u32 = 31_250;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing UMP bridge");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // The mode jumper is sampled exactly once. Switching protocols requires a power cycle, so
    // the pipeline tasks never have to cope with the protocol changing under them.
    let mode_select = Input::new(p.PF13, Pull::Down);
    let mode = OperatingMode::from_pin_level(mode_select.is_high());
    info!("Operating mode: {}", mode);

    let mut midi1_led = Output::new(p.PB0, Level::Low, Speed::Low);
    let mut midi2_led = Output::new(p.PB7, Level::Low, Speed::Low);
    match mode {
        OperatingMode::Midi1 => midi1_led.set_high(),
        OperatingMode::Midi2 => midi2_led.set_high(),
    }

    let activity_led = Output::new(p.PB14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(indicator::activity_led_task(activity_led)));

    // The DIN jacks hang off USART6, which reaches the Arduino D0/D1 header pins (PG9/PG14).
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = MIDI_BAUD;
    let uart = unwrap!(Uart::new(
        p.USART6,
        p.PG9,
        p.PG14,
        Irqs,
        p.DMA2_CH6,
        p.DMA2_CH1,
        uart_config,
    ));
    let (uart_tx, uart_rx) = uart.split();

    // The DMA ring buffer decouples reception from parsing; at 31250 baud, 256 bytes buys the
    // pipeline tasks about 80ms of slack before an overrun.
    static UART_RX_RING: StaticCell<[u8; 256]> = StaticCell::new();
    let uart_rx = uart_rx.into_ring_buffered(UART_RX_RING.init([0; 256]));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    // See docs on `vbus_detection` for details.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    let vendor_id = 0x6666;
    // The product ID tells the host which protocol the bridge booted into.
    let product_id = match mode {
        OperatingMode::Midi1 => 0x6602,
        OperatingMode::Midi2 => 0x6666,
    };

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("MIDI2USB");
    config.product = Some(match mode {
        OperatingMode::Midi1 => "MIDI2USB Converter (MIDI 1.0)",
        OperatingMode::Midi2 => "MIDI2USB Converter (MIDI 2.0)",
    });
    config.serial_number = Some("001");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // Create classes on the builder.
    let class = MidiClass::new(&mut builder, 1, 1, 64);
    let (usb_sender, usb_receiver) = class.split();

    // Build the builder.
    let usb = builder.build();
    unwrap!(spawner.spawn(usb_task(usb)));

    match mode {
        OperatingMode::Midi1 => {
            unwrap!(spawner.spawn(midi1::uart_rx_task(uart_rx)));
            unwrap!(spawner.spawn(midi1::uart_tx_task(uart_tx)));
            unwrap!(spawner.spawn(midi1::usb_rx_task(usb_receiver)));
            unwrap!(spawner.spawn(midi1::usb_tx_task(usb_sender)));
        }
        OperatingMode::Midi2 => {
            unwrap!(spawner.spawn(midi2::uart_rx_task(uart_rx)));
            unwrap!(spawner.spawn(midi2::uart_tx_task(uart_tx)));
            unwrap!(spawner.spawn(midi2::usb_rx_task(usb_receiver)));
            unwrap!(spawner.spawn(midi2::usb_tx_task(usb_sender)));
        }
    }

    // Dropping an Output releases the pin, so the mode LEDs must outlive main; reporting the
    // counters from here keeps them owned forever.
    loop {
        Timer::after_secs(30).await;
        info!("{}", BRIDGE_STATS.snapshot());
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}
