//! Boot-time operating mode.

/// Which protocol the bridge speaks on its USB side, selected by a jumper sampled exactly once
/// at boot. The value is moved into the pipeline tasks at spawn time and never re-read, so a
/// protocol switch always requires a power cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    /// Legacy USB-MIDI 1.0 event packets.
    Midi1,
    /// MIDI 2.0 Universal MIDI Packets.
    Midi2,
}

impl OperatingMode {
    /// Maps the mode pin level: low selects MIDI 1.0, high selects MIDI 2.0.
    pub const fn from_pin_level(high: bool) -> Self {
        if high { Self::Midi2 } else { Self::Midi1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_level_selects_the_mode() {
        assert_eq!(OperatingMode::Midi1, OperatingMode::from_pin_level(false));
        assert_eq!(OperatingMode::Midi2, OperatingMode::from_pin_level(true));
    }
}
