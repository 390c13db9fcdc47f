//! This module contains the tunable constants of the calibration routine along with a trait that makes the menu of
//! calibration stages easy to cycle through from a single pushbutton.

use embassy_time::Duration;
use num_traits::{FromPrimitive, ToPrimitive};

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized,
    {
        let next = self.to_u8().and_then(|index| index.checked_add(1));
        match next.and_then(<Self as FromPrimitive>::from_u8) {
            Some(new_selection) => new_selection,
            None => FromPrimitive::from_u8(0).unwrap_or(self),
        }
    }
}

/// How many consecutive pitch readings the VCO sweep keeps around to decide whether the oscillator has settled.
pub const STABILIZATION_WINDOW: usize = 5;

/// Timing, threshold and target values used throughout a calibration session.
///
/// The defaults were arrived at by calibrating real oscillators; most of them trade speed for precision. A heavier
/// frequency filter or a longer step interval makes for a slower but cleaner sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationConfig {
    /// One-pole low-pass coefficient applied to the raw frequency once per loop iteration, between 0 and 1.
    pub frequency_filter_k: f32,
    /// How long the VCO input may go without an edge before it is considered silent.
    pub silence_timeout: Duration,
    /// Voltage (in millivolts) each channel is driven to while its gain is being trimmed.
    pub gain_targets_mv: [f32; 2],
    /// Maximum tuner deviation (in cents) tolerated before the linearity sweep may begin.
    pub start_deviation_cents: u16,
    /// How long the tuner must stay within [`start_deviation_cents`][Self::start_deviation_cents] before the
    /// output drops to the floor voltage.
    pub tuner_settle: Duration,
    /// How long to let the oscillator settle at the floor voltage before sweeping.
    pub floor_settle: Duration,
    /// Minimum time between two voltage increments of the sweep.
    pub step_interval: Duration,
    /// Lowest voltage (in millivolts) the sweep starts from.
    pub floor_mv: u16,
    /// Fraction of the currently achievable output ceiling at which the sweep stops.
    pub max_scale: f32,
    /// Minimum time between a press and the release that registers it as a short press.
    pub debounce: Duration,
    /// How long the button must be held to register a long press.
    pub long_press: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            frequency_filter_k: 0.994,
            silence_timeout: Duration::from_secs(2),
            gain_targets_mv: [3000.0, 3000.0],
            start_deviation_cents: 10,
            tuner_settle: Duration::from_millis(5000),
            floor_settle: Duration::from_millis(2000),
            step_interval: Duration::from_millis(10),
            floor_mv: 10,
            max_scale: 0.95,
            debounce: Duration::from_millis(240),
            long_press: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_derive::{FromPrimitive, ToPrimitive};

    #[derive(Debug, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq)]
    enum Alpha {
        A,
        B,
        C,
    }
    impl CycleConfig for Alpha {}

    #[test]
    fn cycle() {
        let config = Alpha::A.cycle();
        assert_eq!(
            Alpha::B,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::C,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            Alpha::A,
            config,
            "Should wrap around to first variant; expected left but got right"
        );
    }

    #[test]
    fn long_press_outlasts_debounce() {
        let config = CalibrationConfig::default();
        assert!(
            config.long_press > config.debounce,
            "A long press must not be mistaken for a debounced tap"
        );
    }

    #[test]
    fn filter_coefficient_is_a_fraction() {
        let k = CalibrationConfig::default().frequency_filter_k;
        assert!((0.0..1.0).contains(&k), "Expected 0 <= k < 1 but got {k}");
    }
}
