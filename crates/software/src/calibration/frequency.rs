//! Measures the frequency of the oscillator under calibration from the interval between its edges.
//!
//! [`FrequencyCapture`] is written from the edge interrupt (or the task awaiting it) and read once per control loop
//! iteration by [`FrequencyFilter`], which smooths the jittery instantaneous value and detects when the oscillator
//! has gone quiet.

use core::cell::Cell;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::{Duration, Instant};

const MICROS_PER_SECOND: f32 = 1_000_000.0;

/// What the edge handler shares with the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeSnapshot {
    /// Instantaneous, unfiltered frequency in Hz derived from the two most recent edges; 0 if unknown.
    pub frequency: f32,
    /// When the most recent edge was seen.
    pub last_edge: Option<Instant>,
}

/// Edge timestamps and the raw frequency they imply, safe to share between an interrupt context and the control
/// loop.
///
/// Every access happens inside a critical section, so the two fields are always observed together.
pub struct FrequencyCapture {
    inner: Mutex<CriticalSectionRawMutex, Cell<EdgeSnapshot>>,
}

impl Default for FrequencyCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyCapture {
    /// Constructs an empty [`FrequencyCapture`]; usable in a `static`.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(EdgeSnapshot {
                frequency: 0.0,
                last_edge: None,
            })),
        }
    }

    /// Records an edge seen at `now`.
    ///
    /// The first edge, and any edge that doesn't come after the previous one, only re-establishes the reference
    /// timestamp.
    pub fn on_edge(&self, now: Instant) {
        self.inner.lock(|cell| {
            let mut snapshot = cell.get();
            if let Some(interval) = snapshot
                .last_edge
                .and_then(|last| now.checked_duration_since(last))
                .filter(|interval| interval.as_ticks() > 0)
            {
                snapshot.frequency = MICROS_PER_SECOND / interval.as_micros().max(1) as f32;
            }
            snapshot.last_edge = Some(now);
            cell.set(snapshot);
        });
    }

    /// Atomically reads the shared state.
    pub fn snapshot(&self) -> EdgeSnapshot {
        self.inner.lock(Cell::get)
    }

    /// Zeroes the raw frequency, keeping the last edge timestamp.
    pub fn clear_frequency(&self) {
        self.inner.lock(|cell| {
            let mut snapshot = cell.get();
            snapshot.frequency = 0.0;
            cell.set(snapshot);
        });
    }
}

/// Whether the oscillator is still producing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Presence {
    /// Edges are arriving, or nothing has been measured yet.
    Present,
    /// A measured signal stopped producing edges for longer than the silence timeout.
    Lost,
}

/// One-pole low-pass filter over [`FrequencyCapture`] with silence detection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyFilter {
    frequency: f32,
    k: f32,
    timeout: Duration,
}

impl FrequencyFilter {
    /// Constructs a [`FrequencyFilter`] with smoothing coefficient `k` that reports [`Presence::Lost`] after
    /// `timeout` without edges.
    pub fn new(k: f32, timeout: Duration) -> Self {
        Self {
            frequency: 0.0,
            k,
            timeout,
        }
    }

    /// Folds the latest raw sample into the filtered frequency.
    pub fn update(&mut self, capture: &FrequencyCapture, now: Instant) -> Presence {
        let snapshot = capture.snapshot();
        if self.frequency <= 1.0 {
            self.frequency = snapshot.frequency;
        } else {
            self.frequency = self.frequency * self.k + snapshot.frequency * (1.0 - self.k);
        }

        // an edge stamped after `now` has clearly not timed out
        let timed_out = snapshot
            .last_edge
            .and_then(|last| now.checked_duration_since(last))
            .is_some_and(|quiet| quiet > self.timeout);

        if self.frequency > 0.0 && timed_out {
            self.frequency = 0.0;
            capture.clear_frequency();
            return Presence::Lost;
        }
        Presence::Present
    }

    /// Discards the filter state so the next sample seeds it afresh.
    pub fn clear(&mut self) {
        self.frequency = 0.0;
    }

    /// Filtered frequency in Hz; 0 if silent.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }
}
