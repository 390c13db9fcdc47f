//! Models the two-channel <abbr name="digital-to-analog converter">DAC</abbr> output stage: the target voltage of each
//! channel, and the compensation required to turn those targets into DAC codes.
//!
//! Each channel is followed by a non-inverting amplifier whose nominal gain is set by a resistor pair. Component
//! tolerance means the real gain is a little off, which is what the user trims during gain calibration (see
//! [`GainOffset`]). The DAC's reference is the supply rail, so the supply voltage is measured against a fixed internal
//! reference and factored in as well.

use crate::calibration::GainOffset;
use crate::pitch::map_range;
use measurements::Voltage;
use num_derive::{FromPrimitive, ToPrimitive};

/// Full-scale DAC code (12 bits).
pub const DAC_MAX: u16 = 4095;

/// Nominal gain of each channel's output amplifier, before any calibrated offset is applied.
pub const BASE_GAINS: [f32; 2] = [1.824, 1.824];

/// Supply voltage assumed until a measurement is available.
pub const DEFAULT_SUPPLY_MV: f64 = 5000.0;

/// One of the two CV outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// The first output.
    One,
    /// The second output.
    Two,
}

impl Channel {
    /// Zero-based index of the channel, for addressing per-channel arrays.
    pub fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

/// Target voltages for both channels and what's needed to compensate them.
///
/// Setting a target does not write anything to the hardware. The firmware renders [`codes`][Self::codes] once per
/// loop iteration, after everything else has had a chance to change the targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dac {
    targets: [f32; 2],
    supply: Voltage,
}

impl Default for Dac {
    fn default() -> Self {
        Self::new(Voltage::from_millivolts(DEFAULT_SUPPLY_MV))
    }
}

impl Dac {
    /// Constructs a [`Dac`] with both outputs at 0 V.
    pub fn new(supply: Voltage) -> Self {
        Self {
            targets: [0.0; 2],
            supply,
        }
    }

    /// Sets the target (in millivolts) of either channel; `None` leaves that channel unchanged. Negative targets are
    /// clamped to 0.
    pub fn set(&mut self, channel_1: Option<f32>, channel_2: Option<f32>) {
        for (target, value) in self.targets.iter_mut().zip([channel_1, channel_2]) {
            if let Some(mv) = value {
                *target = mv.max(0.0);
            }
        }
    }

    /// Drives `channel` to `mv` and the other channel to 0 V.
    pub fn solo(&mut self, channel: Channel, mv: f32) {
        match channel {
            Channel::One => self.set(Some(mv), Some(0.0)),
            Channel::Two => self.set(Some(0.0), Some(mv)),
        }
    }

    /// Drives both channels to 0 V.
    pub fn silence(&mut self) {
        self.set(Some(0.0), Some(0.0));
    }

    /// Target of a single channel, in millivolts.
    pub fn target(&self, channel: Channel) -> f32 {
        self.targets[channel.index()]
    }

    /// Targets of both channels, in millivolts.
    pub fn targets(&self) -> [f32; 2] {
        self.targets
    }

    /// Getter.
    pub fn supply(&self) -> Voltage {
        self.supply
    }

    /// Setter.
    pub fn set_supply(&mut self, supply: Voltage) {
        self.supply = supply;
    }

    /// Derives the supply voltage from an ADC reading of a known internal reference taken against the supply rail.
    ///
    /// A zero reading carries no information and is ignored.
    pub fn set_supply_from_reference(&mut self, reference_mv: f32, raw: u16, full_scale: u16) {
        if raw == 0 {
            return;
        }
        let supply_mv = reference_mv * f32::from(full_scale) / f32::from(raw);
        self.supply = Voltage::from_millivolts(f64::from(supply_mv));
    }

    /// Highest voltage (in millivolts) `channel` can presently produce given the supply and its gain.
    pub fn current_maximum(&self, channel: Channel, gain_offset: GainOffset) -> f32 {
        self.supply.as_millivolts() as f32 * (BASE_GAINS[channel.index()] + gain_offset.value())
    }

    /// Compensated DAC codes for both channel targets, clamped to [`DAC_MAX`].
    pub fn codes(&self, gain_offsets: [GainOffset; 2]) -> [u16; 2] {
        [Channel::One, Channel::Two].map(|channel| {
            let ceiling = self.current_maximum(channel, gain_offsets[channel.index()]);
            if ceiling <= 0.0 {
                return 0;
            }
            let code = map_range(
                self.targets[channel.index()],
                0.0,
                ceiling,
                0.0,
                f32::from(DAC_MAX),
            );
            // float to int casts saturate, which covers the lower bound
            (code as u16).min(DAC_MAX)
        })
    }
}
