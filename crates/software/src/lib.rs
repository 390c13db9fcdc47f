//! This crate contains architecture-agnostic logic for a dual-channel MIDI to CV/gate interface, most notably its
//! field calibration routine. The routine trims the gain of both [DAC](`dac`) output stages against a DIP-switch
//! encoded offset and then sweeps an attached [VCO](https://en.wikipedia.org/wiki/Voltage-controlled_oscillator)
//! across its control-voltage range, measuring its pitch to build a per-semitone table that linearizes the
//! oscillator's [V/octave](https://en.wikipedia.org/wiki/CV/gate) response.
//!
//! Nothing in here touches registers. Pins, storage and time are passed in, so every piece can be exercised on the
//! host with fakes.

#![deny(missing_docs)]
#![no_std]

mod log;

/// The calibration engine and the pieces it is assembled from.
pub mod calibration;

pub mod configuration;

pub mod dac;

pub mod pitch;

pub mod storage;

#[cfg(test)]
mod test_fixture;
