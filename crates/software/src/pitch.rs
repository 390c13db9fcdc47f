//! Conversions between frequency, absolute pitch in cents, and uncalibrated 1 V/octave control voltage.
//!
//! Absolute pitch is expressed as the MIDI note number times 100 plus any fractional cents, e.g., 6000 is C4 (middle
//! C) and 6900 is A4. Note 12 (C0) is the lowest pitch the device voices and maps to 0 mV.

use core::ops::RangeInclusive;
use num_traits::Float;

/// Lowest absolute pitch the device handles: C0.
pub const LOWEST_CENTS: u16 = 1200;

/// Highest absolute pitch the device handles: G9.
pub const HIGHEST_CENTS: u16 = 12700;

/// The range of absolute pitches the device handles.
pub const PITCH_RANGE: RangeInclusive<u16> = LOWEST_CENTS..=HIGHEST_CENTS;

const A4_CENTS: f32 = 6900.0;
const A4_HZ: f32 = 440.0;
const CENTS_PER_OCTAVE: f32 = 1200.0;

/// Linearly remaps `x` from one range onto another. Neither range is clamped.
pub fn map_range(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Returns the frequency in Hz of a (possibly fractional) absolute pitch in cents.
pub fn cents_to_hz(cents: f32) -> f32 {
    A4_HZ * 2.0_f32.powf((cents - A4_CENTS) / CENTS_PER_OCTAVE)
}

/// Returns the frequency in Hz of an absolute pitch in cents.
pub fn note_to_hz(cents: u16) -> f32 {
    cents_to_hz(f32::from(cents))
}

/// Returns the absolute pitch in cents closest to `hz`, or 0 if the frequency is not positive.
///
/// The result is not clamped to [`PITCH_RANGE`].
pub fn hz_to_cents(hz: f32) -> u16 {
    if hz <= 0.0 {
        return 0;
    }
    // float to int casts saturate, so anything below C-1 lands on 0
    (A4_CENTS + CENTS_PER_OCTAVE * (hz / A4_HZ).log2()).round() as u16
}

/// Returns how far (in cents) `measured` is from `target`.
///
/// Saturates to [`i16::MAX`] when the target is not positive and to [`i16::MIN`] when nothing was measured.
pub fn cents_deviation(target: f32, measured: f32) -> i16 {
    if target <= 0.0 {
        return i16::MAX;
    }
    if measured <= 0.0 {
        return i16::MIN;
    }

    let cents = CENTS_PER_OCTAVE * (measured / target).log2();
    if cents >= f32::from(i16::MAX) {
        i16::MAX
    } else if cents <= f32::from(i16::MIN) {
        i16::MIN
    } else {
        cents.round() as i16
    }
}

/// Converts an absolute pitch into millivolts on an ideal 1 V/octave scale anchored at C0 = 0 mV.
pub fn note_to_mv(cents: u16) -> f32 {
    if cents <= LOWEST_CENTS {
        return 0.0;
    }

    let octave = cents / 1200;
    let fraction = f32::from(cents % 1200) / CENTS_PER_OCTAVE;
    1000.0 * (f32::from(octave - 1) + fraction)
}
