//! Turns a single active-low pushbutton into discrete short and long press events.

use crate::configuration::CalibrationConfig;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::InputPin;

/// A classified press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    /// Released after the debounce interval but before the long press threshold.
    Short,
    /// Held past the long press threshold; fires before the button is released.
    Long,
}

/// Polls a button and classifies its presses.
///
/// A pin read error is treated as "not pressed".
pub struct Debouncer<P> {
    pin: P,
    pressed_since: Option<Instant>,
    handled: bool,
    debounce: Duration,
    long_press: Duration,
}

impl<P: InputPin> Debouncer<P> {
    /// Constructs a [`Debouncer`] using the thresholds in `config`.
    pub fn new(pin: P, config: &CalibrationConfig) -> Self {
        Self {
            pin,
            pressed_since: None,
            handled: false,
            debounce: config.debounce,
            long_press: config.long_press,
        }
    }

    /// Samples the pin directly, bypassing debounce.
    pub fn is_pressed(&mut self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }

    /// Treats an ongoing press as already handled so that neither event fires for it.
    pub fn suppress_current_press(&mut self, now: Instant) {
        self.pressed_since = Some(now);
        self.handled = true;
    }

    /// Samples the pin and reports at most one event.
    pub fn poll(&mut self, now: Instant) -> Option<ButtonEvent> {
        let pressed = self.is_pressed();

        let since = match self.pressed_since {
            None if pressed => {
                self.pressed_since = Some(now);
                self.handled = false;
                return None;
            }
            None => return None,
            // clamp a timestamp that's somehow ahead of the clock
            Some(since) if since > now => {
                self.pressed_since = Some(now);
                now
            }
            Some(since) => since,
        };
        let held = now - since;

        if !pressed {
            if held < self.debounce {
                return None;
            }
            self.pressed_since = None;
            return (!self.handled).then_some(ButtonEvent::Short);
        }

        if !self.handled && held >= self.long_press {
            self.handled = true;
            return Some(ButtonEvent::Long);
        }
        None
    }
}
