//! Stateful protocol transcoders for the MIDI 2.0 pipeline.
//!
//! Three stages, each an independent FIFO state machine with its own buffering: MIDI 1.0 bytes
//! into MIDI-1.0-protocol UMP, MIDI-1.0-protocol UMP into MIDI-2.0-protocol UMP, and any UMP
//! back down to MIDI 1.0 bytes for the UART. Output order always matches input order.

pub mod bytestream_to_ump;
pub mod ump_to_bytestream;
pub mod ump_to_midi2;

pub use bytestream_to_ump::BytestreamToUmp;
pub use ump_to_bytestream::UmpToBytestream;
pub use ump_to_midi2::UmpToMidi2;

/// A push-in, poll-out conversion stage.
///
/// `feed` never blocks and never fails; a stage that cannot use an input drops it. Callers
/// drain with `read_output` until `None` after each `feed`.
pub trait Transcoder {
    /// Unit accepted by this stage.
    type Input;
    /// Unit produced by this stage.
    type Output;

    /// Consumes one input unit.
    fn feed(&mut self, input: Self::Input);

    /// Returns `true` when at least one output unit is ready.
    fn has_output(&self) -> bool;

    /// Removes and returns the oldest pending output unit.
    fn read_output(&mut self) -> Option<Self::Output>;
}

/// Widens a value from `src_bits` to `dst_bits` with the min-center-max bit-repeat scheme from
/// the MIDI 2.0 specification: minimum maps to minimum, center to center, maximum to all ones.
pub fn scale_up(value: u32, src_bits: u8, dst_bits: u8) -> u32 {
    let scale_bits = dst_bits - src_bits;
    let shifted = value << scale_bits;
    let center = 1 << (src_bits - 1);
    if value <= center {
        return shifted;
    }
    let repeat_bits = src_bits - 1;
    let mut repeat = value & ((1 << repeat_bits) - 1);
    if scale_bits > repeat_bits {
        repeat <<= scale_bits - repeat_bits;
    } else {
        repeat >>= repeat_bits - scale_bits;
    }
    let mut result = shifted;
    while repeat != 0 {
        result |= repeat;
        repeat >>= repeat_bits;
    }
    result
}

/// Narrows a value from `src_bits` to `dst_bits`. The inverse of [`scale_up`] for every value
/// that fits the narrow width.
pub const fn scale_down(value: u32, src_bits: u8, dst_bits: u8) -> u32 {
    value >> (src_bits - dst_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_preserves_min_center_max() {
        assert_eq!(0x0000, scale_up(0x00, 7, 16));
        assert_eq!(0x8000, scale_up(0x40, 7, 16));
        assert_eq!(0xFFFF, scale_up(0x7F, 7, 16));
        assert_eq!(0xFFFF_FFFF, scale_up(0x7F, 7, 32));
        assert_eq!(0x8000_0000, scale_up(0x2000, 14, 32));
    }

    #[test]
    fn downscaling_inverts_upscaling_for_all_7_bit_values() {
        for value in 0..0x80 {
            assert_eq!(value, scale_down(scale_up(value, 7, 16), 16, 7));
            assert_eq!(value, scale_down(scale_up(value, 7, 32), 32, 7));
        }
    }

    #[test]
    fn downscaling_inverts_upscaling_for_all_14_bit_values() {
        for value in 0..0x4000 {
            assert_eq!(value, scale_down(scale_up(value, 14, 32), 32, 14));
        }
    }
}
