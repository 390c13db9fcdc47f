//! Stand-ins for the hardware the calibration engine talks to.

use crate::calibration::FrequencyCapture;
use crate::pitch::cents_to_hz;
use core::cell::Cell;
use core::convert::Infallible;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorType, InputPin};

/// An active-low button whose state is controlled by the test.
pub struct FakeButton<'a> {
    pressed: &'a Cell<bool>,
}

impl<'a> FakeButton<'a> {
    pub fn new(pressed: &'a Cell<bool>) -> Self {
        Self { pressed }
    }
}

impl ErrorType for FakeButton<'_> {
    type Error = Infallible;
}

impl InputPin for FakeButton<'_> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed.get())
    }
}

/// An oscillator whose pitch (in cents) is a function of its control voltage (in millivolts).
///
/// Edges are emitted into a [`FrequencyCapture`] as simulated time advances.
pub struct SimulatedVco<F> {
    response: F,
    next_edge: Option<Instant>,
}

impl<F: Fn(f32) -> f32> SimulatedVco<F> {
    pub fn new(response: F) -> Self {
        Self {
            response,
            next_edge: None,
        }
    }

    /// Emits every edge due up to and including `now` while driven at `mv`. A pitch of 0 cents (or below) is silent.
    pub fn run_until(&mut self, capture: &FrequencyCapture, mv: f32, now: Instant) {
        let cents = (self.response)(mv);
        if cents <= 0.0 {
            self.next_edge = None;
            return;
        }
        let period = Duration::from_micros((1_000_000.0 / cents_to_hz(cents)) as u64);
        let mut edge = self.next_edge.unwrap_or(now);
        while edge <= now {
            capture.on_edge(edge);
            edge += period;
        }
        self.next_edge = Some(edge);
    }
}
