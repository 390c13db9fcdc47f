mod button;
pub use button::*;

mod engine;
pub use engine::*;

mod frequency;
pub use frequency::*;

mod gain;
pub use gain::*;

mod matrix;
pub use matrix::*;

mod stage;
pub use stage::*;

mod sweep;
pub use sweep::*;

mod tuner;
pub use tuner::*;

/// Reasons a calibration session ends up in [`Stage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// The VCO stopped producing edges in the middle of a sweep.
    Silence,
    /// The measured semitone skipped one or went backwards between two matrix entries.
    NonMonotonic {
        /// Index of the previous entry.
        last: u8,
        /// Index of the entry that contradicts it.
        next: u8,
    },
    /// The sweep ended without a usable range of semitones.
    NothingMeasured,
    /// Persistent storage could not be accessed.
    Storage,
}
