//! This crate contains the architecture-agnostic protocol core of the UMP Bridge, a device which
//! converts between traditional 5-pin-DIN [MIDI 1.0](https://midi.org/midi-1-0) byte streams and
//! USB MIDI. In its alternate operating mode the bridge speaks
//! [MIDI 2.0 Universal MIDI Packets](https://midi.org/details-about-midi-2-0-midi-ci-profiles-and-property-exchange)
//! over USB, answers UMP Endpoint Discovery, and negotiates identity via MIDI-CI.
//!
//! The hardware-facing half of the project (USB device stack, UART/DMA, GPIO) lives in the
//! companion firmware crate; everything here is `no_std`, allocation-free, and testable on the
//! host. Each conversion stage is an explicit state machine owning its own buffers, so the
//! firmware can run several of them concurrently without sharing state.

#![deny(missing_docs)]
#![no_std]

pub mod ci;
pub mod convert;
pub mod message;
pub mod mode;
pub mod parser;
pub mod stats;
pub mod stream;
pub mod sysex;
pub mod sysex7;
pub mod ump;
pub mod usb_midi;
