//! Tuner: plays a DIP-selected note and reports how far the measured pitch is from it.

use crate::log::info;
use crate::pitch::{cents_deviation, note_to_hz};

const MAX_OCTAVE: u8 = 8;
const MAX_NOTE: u8 = 11;

/// Decodes the tuner's target pitch (in cents) from the DIP switch: the upper nibble selects the octave (0 to 8),
/// the lower nibble the note within it (C to B). Out of range values are capped.
pub fn target_cents(dip: u8) -> u16 {
    let octave = u16::from((dip >> 4).min(MAX_OCTAVE));
    let note = u16::from((dip & 0x0F).min(MAX_NOTE));
    (octave * 12 + note + 12) * 100
}

/// Tracks the deviation between the selected target and the measured pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tuner {
    target: Option<u16>,
    deviation_cents: i16,
}

impl Tuner {
    /// Selects the target from `dip`, measures the deviation of `frequency` (in Hz) from it, and returns the target
    /// pitch so the caller can drive it.
    pub fn update(&mut self, dip: u8, frequency: f32) -> u16 {
        let target = target_cents(dip);
        if self.target != Some(target) {
            // the target never exceeds note 119
            let note = wmidi::Note::from_u8_lossy((target / 100) as u8);
            info!("Tuner target: {} ({=u16} cents)", note.to_str(), target);
            self.target = Some(target);
        }
        self.deviation_cents = cents_deviation(note_to_hz(target), frequency);
        target
    }

    /// Getter.
    pub fn deviation_cents(&self) -> i16 {
        self.deviation_cents
    }

    /// Getter.
    pub fn target(&self) -> Option<u16> {
        self.target
    }

    /// Forgets the target and the deviation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
