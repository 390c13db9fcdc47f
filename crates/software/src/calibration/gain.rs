//! Decodes the DIP switch into a small correction of each output amplifier's gain.

/// A trim applied on top of a channel's nominal amplifier gain, in the range ±0.127.
///
/// The DIP switch (and the persisted copy of it) encodes the magnitude in thousandths across its seven low bits; the
/// most significant bit (the first switch) selects a positive trim when set and a negative one when clear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainOffset {
    thousandths: i8,
}

const SIGN_BIT: u8 = 0x80;
const MAGNITUDE_MASK: u8 = 0x7F;

impl GainOffset {
    /// Decodes a DIP switch state.
    pub fn from_dip(state: u8) -> Self {
        // the mask keeps the magnitude within i8 range
        let magnitude = (state & MAGNITUDE_MASK) as i8;
        let thousandths = if state & SIGN_BIT != 0 {
            magnitude
        } else {
            -magnitude
        };
        Self { thousandths }
    }

    /// Encodes the trim the way the DIP switch would. Zero encodes with the sign bit clear.
    pub fn to_dip(self) -> u8 {
        let magnitude = self.thousandths.unsigned_abs();
        if self.thousandths > 0 {
            SIGN_BIT | magnitude
        } else {
            magnitude
        }
    }

    /// Getter.
    pub fn thousandths(self) -> i8 {
        self.thousandths
    }

    /// The trim as a gain delta, e.g., 0.05 for an encoded +50.
    pub fn value(self) -> f32 {
        f32::from(self.thousandths) / 1000.0
    }
}
