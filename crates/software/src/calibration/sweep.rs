//! The VCO linearity sweep.
//!
//! A sweep raises a channel's output one millivolt at a time, waiting after each increment for the measured pitch to
//! settle. Whenever the pitch crosses into a new semitone, the voltage that came closest to the previous
//! semitone's exact pitch is stored in the channel's [`CalibrationMatrix`].

use super::CalibrationError;
use super::matrix::{CalibrationMatrix, HIGHEST_NOTE, LOWEST_NOTE};
use crate::configuration::STABILIZATION_WINDOW;
use crate::log::{debug, error, info};
use crate::pitch::{HIGHEST_CENTS, PITCH_RANGE, hz_to_cents};
use embassy_time::{Duration, Instant};
use tinyvec::ArrayVec;

/// The phases of a VCO calibration run, in order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VcoPhase {
    /// The channel plays the tuner's target until the VCO has stayed in tune for a while.
    Tuner {
        /// When the deviation last left the acceptable band (or was first measured).
        in_band_since: Option<Instant>,
    },
    /// The channel sits at the floor voltage so the VCO can settle before the sweep.
    Lower {
        /// When the floor voltage was applied.
        since: Instant,
    },
    /// The sweep itself.
    Linearity(Sweep),
}

impl Default for VcoPhase {
    fn default() -> Self {
        Self::Tuner { in_band_since: None }
    }
}

/// The outcome of one [`Sweep::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SweepStep {
    /// Nothing changed; either the step interval hasn't elapsed or the pitch hasn't settled.
    Waiting,
    /// The output must now be driven at `mv`.
    Advanced {
        /// Next output voltage.
        mv: u16,
        /// How far along the sweep is, from 0 to 1.
        progress: f32,
    },
    /// The matrix is complete.
    Finished {
        /// How far along the sweep got, from 0 to 1.
        progress: f32,
    },
}

/// Working state of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    mv_current: u16,
    cents_last: u16,
    readings: ArrayVec<[u16; STABILIZATION_WINDOW]>,
    closest_mv: u16,
    address_last: Option<u8>,
    last_step: Option<Instant>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Sweep {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Sweep {{ mv: {}, cents_last: {}, closest_mv: {}, address_last: {} }}",
            self.mv_current,
            self.cents_last,
            self.closest_mv,
            self.address_last
        );
    }
}

impl Sweep {
    /// Constructs a [`Sweep`] beginning at `floor_mv`.
    pub fn start(floor_mv: u16) -> Self {
        Self {
            mv_current: floor_mv,
            cents_last: 0,
            readings: ArrayVec::new(),
            closest_mv: floor_mv,
            address_last: None,
            last_step: None,
        }
    }

    /// Voltage the sweep is presently measuring at.
    pub fn mv_current(&self) -> u16 {
        self.mv_current
    }

    /// Runs one iteration of the sweep against the latest filtered `frequency` (in Hz), writing into `matrix`.
    ///
    /// The sweep finishes once the voltage reaches `mv_end` or the pitch leaves the top of the range. Measurements
    /// that skip a semitone, or go backwards, abort it.
    pub fn step(
        &mut self,
        now: Instant,
        frequency: f32,
        mv_end: f32,
        interval: Duration,
        matrix: &mut CalibrationMatrix,
    ) -> Result<SweepStep, CalibrationError> {
        match self.last_step {
            None => self.last_step = Some(now),
            // a step time ahead of the clock is treated as elapsed
            Some(last) if last < now && now - last < interval => return Ok(SweepStep::Waiting),
            Some(_) => {}
        }

        let cents = hz_to_cents(frequency);
        if !self.stabilize(cents) {
            return Ok(SweepStep::Waiting);
        }
        self.last_step = Some(now);

        if PITCH_RANGE.contains(&cents) && PITCH_RANGE.contains(&self.cents_last) {
            // PITCH_RANGE keeps both within u8
            let note = (cents / 100) as u8;
            let note_last = (self.cents_last / 100) as u8;

            if note == note_last && cents % 100 < self.cents_last % 100 {
                self.closest_mv = self.mv_current;
            }
            if note > note_last {
                self.commit(note_last, matrix)?;
            }
        } else {
            self.closest_mv = self.mv_current;
        }

        self.mv_current = self.mv_current.saturating_add(1);
        self.readings.clear();

        let progress = (f32::from(cents) / f32::from(HIGHEST_CENTS))
            .max(f32::from(self.mv_current) / mv_end)
            .clamp(0.0, 1.0);

        let finished = f32::from(self.mv_current) >= mv_end || cents > HIGHEST_CENTS;
        if finished {
            self.finish(matrix)?;
        }
        self.cents_last = cents;

        Ok(if finished {
            SweepStep::Finished { progress }
        } else {
            SweepStep::Advanced {
                mv: self.mv_current,
                progress,
            }
        })
    }

    /// Records `cents` and reports whether the readings before it all agree with it.
    fn stabilize(&mut self, cents: u16) -> bool {
        let full = self.readings.len() == STABILIZATION_WINDOW;
        let stabilized = full
            && self
                .readings
                .iter()
                .all(|&reading| reading != 0 && reading.abs_diff(cents) <= 1);

        if full {
            self.readings.remove(0);
        }
        self.readings.push(cents);
        stabilized
    }

    /// Stores the closest voltage of `note`, which the pitch has just moved past.
    fn commit(&mut self, note: u8, matrix: &mut CalibrationMatrix) -> Result<(), CalibrationError> {
        if matrix.note_min() > HIGHEST_NOTE {
            info!("Lowest calibrated note: {=u8}", note);
            matrix.set_note_min(note);
        }

        let address = note.saturating_sub(LOWEST_NOTE);
        if let Some(last) = self.address_last {
            if address < last || address - last > 1 {
                error!("Sweep jumped from matrix[{=u8}] to matrix[{=u8}]", last, address);
                return Err(CalibrationError::NonMonotonic { last, next: address });
            }
        }

        // noise around a boundary can report the same crossing again
        if self.address_last.is_none_or(|last| address > last) {
            debug!("matrix[{=u8}] = {=u16} mV", address, self.closest_mv);
            matrix.set_entry(address, self.closest_mv);
            self.address_last = Some(address);
            self.closest_mv = self.mv_current;
        }
        Ok(())
    }

    /// Stores the last semitone reached and closes the matrix.
    fn finish(&mut self, matrix: &mut CalibrationMatrix) -> Result<(), CalibrationError> {
        let Some(last) = self.address_last else {
            error!("Sweep ended without measuring a single semitone");
            return Err(CalibrationError::NothingMeasured);
        };

        let note_max = self.cents_last / 100;
        if !(u16::from(LOWEST_NOTE)..=u16::from(HIGHEST_NOTE)).contains(&note_max) {
            error!("Sweep ended out of range at note {=u16}", note_max);
            return Err(CalibrationError::NothingMeasured);
        }

        // checked above
        let note_max = note_max as u8;
        let address = note_max - LOWEST_NOTE;
        if address < last || address - last > 1 {
            error!("Sweep ended at matrix[{=u8}] after matrix[{=u8}]", address, last);
            return Err(CalibrationError::NonMonotonic { last, next: address });
        }

        if address > last {
            debug!("matrix[{=u8}] = {=u16} mV", address, self.closest_mv);
            matrix.set_entry(address, self.closest_mv);
        }
        matrix.set_note_max(note_max);
        info!("Highest calibrated note: {=u8}", note_max);

        if !matrix.is_valid() {
            return Err(CalibrationError::NothingMeasured);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::matrix::UNSET;
    use crate::pitch::cents_to_hz;

    const INTERVAL: Duration = Duration::from_millis(10);

    struct Harness {
        sweep: Sweep,
        matrix: CalibrationMatrix,
        now: Instant,
        mv_end: f32,
    }

    impl Harness {
        fn new(mv_end: f32) -> Self {
            Self {
                sweep: Sweep::start(10),
                matrix: CalibrationMatrix::default(),
                now: Instant::from_millis(1_000),
                mv_end,
            }
        }

        fn feed(&mut self, cents: f32) -> Result<SweepStep, CalibrationError> {
            self.now += INTERVAL;
            self.sweep
                .step(self.now, cents_to_hz(cents), self.mv_end, INTERVAL, &mut self.matrix)
        }

        /// Feeds a steady pitch until the sweep does something.
        fn settle(&mut self, cents: f32) -> Result<SweepStep, CalibrationError> {
            for _ in 0..10 {
                let step = self.feed(cents)?;
                if step != SweepStep::Waiting {
                    return Ok(step);
                }
            }
            panic!("Sweep never settled on {cents} cents");
        }

        /// Runs a simulated VCO whose pitch is `response(mv)` until the sweep finishes.
        fn run(&mut self, response: impl Fn(u16) -> f32) -> Result<SweepStep, CalibrationError> {
            loop {
                let step = self.settle(response(self.sweep.mv_current()))?;
                if let SweepStep::Finished { .. } = step {
                    return Ok(step);
                }
            }
        }
    }

    // 1200 cents at 10 mV, 1300 cents at 50 mV
    fn linear(mv: u16) -> f32 {
        1200.0 + f32::from((mv - 10) * 5 / 2)
    }

    #[test]
    fn waits_for_interval() {
        let mut harness = Harness::new(1000.0);
        let start = harness.now;
        let step = harness
            .sweep
            .step(start, cents_to_hz(1200.0), 1000.0, INTERVAL, &mut harness.matrix);
        assert_eq!(Ok(SweepStep::Waiting), step, "Expected left but got right");

        // readings inside the interval are not taken
        for ms in 1..10 {
            let now = start + Duration::from_millis(ms);
            let step = harness
                .sweep
                .step(now, cents_to_hz(1200.0), 1000.0, INTERVAL, &mut harness.matrix);
            assert_eq!(Ok(SweepStep::Waiting), step, "Expected left but got right");
        }
        assert_eq!(1, harness.sweep.readings.len(), "Expected left but got right");
    }

    #[test]
    fn step_time_ahead_of_clock_counts_as_elapsed() {
        let mut harness = Harness::new(1000.0);
        let now = harness.now;
        harness.sweep.last_step = Some(now + Duration::from_secs(60));
        for _ in 0..STABILIZATION_WINDOW {
            let step = harness
                .sweep
                .step(now, cents_to_hz(1200.0), 1000.0, INTERVAL, &mut harness.matrix);
            assert_eq!(Ok(SweepStep::Waiting), step, "Expected left but got right");
        }
        assert_eq!(
            STABILIZATION_WINDOW,
            harness.sweep.readings.len(),
            "Every reading should have been taken"
        );

        let step = harness
            .sweep
            .step(now, cents_to_hz(1200.0), 1000.0, INTERVAL, &mut harness.matrix);
        assert!(
            matches!(step, Ok(SweepStep::Advanced { mv: 11, .. })),
            "Expected the sweep to advance"
        );
    }

    mod stabilization {
        use super::*;

        #[test]
        fn needs_a_full_window() {
            let mut harness = Harness::new(1000.0);
            for _ in 0..STABILIZATION_WINDOW {
                assert_eq!(
                    Ok(SweepStep::Waiting),
                    harness.feed(1200.0),
                    "Expected left but got right"
                );
            }
            assert!(
                matches!(harness.feed(1200.0), Ok(SweepStep::Advanced { mv: 11, .. })),
                "Expected the sweep to advance"
            );
        }

        #[test]
        fn tolerates_one_cent() {
            let mut harness = Harness::new(1000.0);
            for cents in [1200.0, 1201.0, 1200.0, 1201.0, 1200.0] {
                harness.feed(cents).unwrap();
            }
            assert!(
                matches!(harness.feed(1201.0), Ok(SweepStep::Advanced { .. })),
                "Expected the sweep to advance"
            );
        }

        #[test]
        fn outlier_blocks_advance() {
            let mut harness = Harness::new(1000.0);
            for cents in [1300.0, 1300.0, 1300.0, 1300.0, 1310.0, 1300.0] {
                assert_eq!(
                    Ok(SweepStep::Waiting),
                    harness.feed(cents),
                    "Expected left but got right"
                );
            }
            assert_eq!(10, harness.sweep.mv_current(), "Expected left but got right");
            assert!(!harness.matrix.is_valid());
            assert_eq!(UNSET, harness.matrix.note_min(), "Expected left but got right");
        }

        #[test]
        fn silence_never_stabilizes() {
            let mut harness = Harness::new(1000.0);
            for _ in 0..20 {
                let step = harness.sweep.step(
                    harness.now,
                    0.0,
                    1000.0,
                    INTERVAL,
                    &mut harness.matrix,
                );
                harness.now += INTERVAL;
                assert_eq!(Ok(SweepStep::Waiting), step, "Expected left but got right");
            }
        }
    }

    #[test]
    fn single_semitone_commit() {
        let mut harness = Harness::new(1000.0);
        for mv in 10..50 {
            assert_eq!(mv, harness.sweep.mv_current(), "Expected left but got right");
            harness.settle(linear(mv)).unwrap();
        }
        assert_eq!(UNSET, harness.matrix.note_min(), "Nothing should be committed yet");

        harness.settle(linear(50)).unwrap();
        assert_eq!(12, harness.matrix.note_min(), "Expected left but got right");
        assert_eq!(Some(10), harness.matrix.entry(12), "Expected left but got right");
    }

    #[test]
    fn complete_sweep() {
        let mut harness = Harness::new(100.0);
        let step = harness.run(linear).unwrap();
        assert!(
            matches!(step, SweepStep::Finished { .. }),
            "Expected the sweep to finish"
        );

        let matrix = &harness.matrix;
        assert!(matrix.is_valid());
        assert_eq!((12, 14), (matrix.note_min(), matrix.note_max()), "Expected left but got right");
        assert_eq!(
            [Some(10), Some(50), Some(90)],
            [matrix.entry(12), matrix.entry(13), matrix.entry(14)],
            "Expected left but got right"
        );
    }

    #[test]
    fn table_is_monotonic() {
        // a VCO that goes flat at the top of its range
        let mut harness = Harness::new(2000.0);
        harness
            .run(|mv| {
                let mv = f32::from(mv);
                2400.0 + 1.2 * mv - mv * mv / 10_000.0
            })
            .unwrap();

        assert!(
            harness.matrix.entries().count() > 10,
            "Expected a couple dozen notes but got {}",
            harness.matrix.entries().count()
        );
        let mut previous = None;
        for (note, mv) in harness.matrix.entries() {
            if let Some((previous_note, previous_mv)) = previous {
                assert!(
                    previous_mv <= mv,
                    "Not monotonic: note {previous_note} at {previous_mv} mV, note {note} at {mv} mV"
                );
            }
            previous = Some((note, mv));
        }
    }

    #[test]
    fn closest_voltage_tracks_lowest_fraction() {
        let mut harness = Harness::new(1000.0);
        // 12.80, 12.90, 12.20, 12.30, then 13.10
        for cents in [1280.0, 1290.0, 1220.0, 1230.0, 1310.0] {
            harness.settle(cents).unwrap();
        }
        // 12.20 was read at 12 mV
        assert_eq!(Some(12), harness.matrix.entry(12), "Expected left but got right");
    }

    #[test]
    fn skipped_semitone_aborts() {
        let mut harness = Harness::new(1000.0);
        harness.settle(1250.0).unwrap();
        harness.settle(1450.0).unwrap();
        assert_eq!(
            Err(CalibrationError::NonMonotonic { last: 0, next: 2 }),
            harness.settle(1650.0),
            "Expected left but got right"
        );
    }

    #[test]
    fn backwards_semitone_is_ignored_until_it_recrosses() {
        let mut harness = Harness::new(1000.0);
        for cents in [1250.0, 1350.0, 1250.0, 1350.0] {
            harness.settle(cents).unwrap();
        }
        // the recrossing doesn't rewrite matrix[0]
        assert_eq!(Some(10), harness.matrix.entry(12), "Expected left but got right");
    }

    #[test]
    fn out_of_range_is_not_committed() {
        let mut harness = Harness::new(1000.0);
        for cents in [1100.0, 1150.0, 1210.0] {
            harness.settle(cents).unwrap();
        }
        assert_eq!(UNSET, harness.matrix.note_min(), "Expected left but got right");
    }

    #[test]
    fn finishing_without_a_commit_fails() {
        let mut harness = Harness::new(12.0);
        harness.settle(1250.0).unwrap();
        assert_eq!(
            Err(CalibrationError::NothingMeasured),
            harness.settle(1251.0),
            "Expected left but got right"
        );
    }

    #[test]
    fn finishes_when_pitch_leaves_the_range() {
        let mut harness = Harness::new(10_000.0);
        for cents in [12550.0, 12650.0] {
            harness.settle(cents).unwrap();
        }
        let step = harness.settle(12750.0).unwrap();
        assert!(
            matches!(step, SweepStep::Finished { progress } if progress == 1.0),
            "Expected the sweep to finish but got {step:?}"
        );
        assert_eq!(
            (125, 126),
            (harness.matrix.note_min(), harness.matrix.note_max()),
            "Expected left but got right"
        );
    }
}
