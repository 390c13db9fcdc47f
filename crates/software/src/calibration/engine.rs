//! The calibration session as a whole.

use super::{
    ButtonEvent, CalibrationError, CalibrationMatrix, Debouncer, Effect, FrequencyCapture,
    FrequencyFilter, GainOffset, Presence, Prep, Stage, StageId, Sweep, SweepStep, Transition,
    Tuner, VcoPhase, VcoStage,
};
use crate::configuration::CalibrationConfig;
use crate::dac::{Channel, Dac};
use crate::log::{error, info, warning};
use crate::pitch::{PITCH_RANGE, note_to_mv};
use crate::storage::{self, Storage};
use embassy_time::Instant;
use embedded_hal::digital::InputPin;

const CHANNELS: [Channel; 2] = [Channel::One, Channel::Two];

/// Owns everything a calibration session needs and advances it once per control loop iteration.
///
/// The engine is inert unless [`init_check`][Self::init_check] found the button held at boot. Either way it remains
/// the source of calibrated pitch voltages through [`note_to_mv_cal`][Self::note_to_mv_cal].
///
/// After each [`step`][Self::step], the DAC targets it holds are what both outputs should be driven to.
pub struct CalibrationEngine<'a, P, S> {
    config: CalibrationConfig,
    button: Debouncer<P>,
    storage: S,
    capture: &'a FrequencyCapture,
    dac: Dac,
    active: bool,
    stage: Stage,
    filter: FrequencyFilter,
    tuner: Tuner,
    matrices: [CalibrationMatrix; 2],
    gain_offsets: [GainOffset; 2],
    vco_progress: f32,
}

impl<'a, P: InputPin, S: Storage> CalibrationEngine<'a, P, S> {
    /// Constructs an idle [`CalibrationEngine`] with no stored calibration loaded.
    pub fn new(
        config: CalibrationConfig,
        pin: P,
        storage: S,
        capture: &'a FrequencyCapture,
        dac: Dac,
    ) -> Self {
        Self {
            button: Debouncer::new(pin, &config),
            filter: FrequencyFilter::new(config.frequency_filter_k, config.silence_timeout),
            config,
            storage,
            capture,
            dac,
            active: false,
            stage: Stage::Idle,
            tuner: Tuner::default(),
            matrices: [CalibrationMatrix::default(), CalibrationMatrix::default()],
            gain_offsets: [GainOffset::default(); 2],
            vco_progress: 0.0,
        }
    }

    /// Loads stored calibration and engages a session if the button is being held.
    ///
    /// Returns whether the session is engaged, in which case the caller is expected to start feeding edges into the
    /// [`FrequencyCapture`] and to stop rendering anything else on the outputs.
    pub fn init_check(&mut self, now: Instant) -> bool {
        self.restore();

        if self.button.is_pressed() {
            info!("Calibration engaged");
            self.active = true;
            // the boot-time hold must not count as a press
            self.button.suppress_current_press(now);
            self.stage = Stage::Prep(Prep::Gain1);
        }
        self.active
    }

    /// Loads both gain encodings and both matrices from storage. Anything that can't be read keeps its default.
    pub fn restore(&mut self) {
        for channel in CHANNELS {
            let index = channel.index();
            match storage::load_gain(&mut self.storage, channel) {
                Ok(offset) => {
                    info!("Gain offset of {}: {=i8}/1000", channel, offset.thousandths());
                    self.gain_offsets[index] = offset;
                }
                Err(_) => warning!("Could not restore gain offset of {}", channel),
            }
            match storage::load_matrix(&mut self.storage, channel) {
                Ok(matrix) => {
                    info!("Matrix of {}: {}", channel, matrix);
                    self.matrices[index] = matrix;
                }
                Err(_) => warning!("Could not restore matrix of {}", channel),
            }
        }
    }

    /// Advances the session given the current DIP switch state.
    pub fn step(&mut self, dip: u8, now: Instant) {
        if !self.active {
            return;
        }
        if matches!(self.stage, Stage::Error) {
            self.dac.silence();
            return;
        }

        if let Some(event) = self.button.poll(now) {
            self.handle(event, dip);
        }

        if let Stage::Gain(channel) = self.stage {
            self.gain_offsets[channel.index()] = GainOffset::from_dip(dip);
        }

        if self.filter.update(self.capture, now) == Presence::Lost
            && self.stage.vco_stage() == VcoStage::Linearity
        {
            error!("VCO went silent");
            self.fail(CalibrationError::Silence);
            return;
        }

        match self.stage {
            Stage::Tuner => self.tune(dip),
            Stage::Vco(channel, _) => {
                if self.stage.vco_stage() == VcoStage::Tuner {
                    self.tune(dip);
                }
                if let Err(error) = self.calibrate_vco(channel, now) {
                    self.fail(error);
                }
            }
            _ => {}
        }
    }

    fn handle(&mut self, event: ButtonEvent, dip: u8) {
        let stage = core::mem::replace(&mut self.stage, Stage::Idle);
        let Transition { next, effect } = stage.on_button(event);
        self.stage = next;

        if effect != Effect::None {
            info!("{} press, now in {}", event, self.stage.id());
        }
        if let Err(error) = self.apply(effect, dip) {
            self.fail(error);
        }
    }

    fn apply(&mut self, effect: Effect, dip: u8) -> Result<(), CalibrationError> {
        match effect {
            Effect::None => {}
            Effect::Silence => self.dac.silence(),
            Effect::DriveGain(channel) => {
                self.dac.solo(channel, self.config.gain_targets_mv[channel.index()]);
            }
            Effect::PersistGain(channel) => {
                self.dac.silence();
                storage::save_gain_encoding(&mut self.storage, channel, dip)
                    .map_err(|_| CalibrationError::Storage)?;
                self.gain_offsets[channel.index()] = GainOffset::from_dip(dip);
            }
            Effect::StartTuner => {
                self.tuner.reset();
                self.filter.clear();
            }
            Effect::ExitTuner => {
                self.tuner.reset();
                self.dac.silence();
            }
            Effect::StartVco(channel) => {
                self.matrices[channel.index()].invalidate();
                self.tuner.reset();
                self.filter.clear();
                self.vco_progress = 0.0;
            }
            Effect::ResetMatrix(channel) => {
                self.matrices[channel.index()].invalidate();
                self.persist_matrices()?;
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: CalibrationError) {
        error!("Calibration failed: {}", error);
        self.stage = Stage::Error;
        self.dac.silence();
    }

    fn persist_matrices(&mut self) -> Result<(), CalibrationError> {
        for channel in CHANNELS {
            storage::save_matrix(&mut self.storage, channel, &self.matrices[channel.index()])
                .map_err(|_| CalibrationError::Storage)?;
        }
        Ok(())
    }

    fn tune(&mut self, dip: u8) {
        let target = self.tuner.update(dip, self.filter.frequency());
        let [mv_1, mv_2] = CHANNELS.map(|channel| self.note_to_mv_cal(channel, target));
        self.dac.set(Some(mv_1), Some(mv_2));
    }

    fn calibrate_vco(&mut self, channel: Channel, now: Instant) -> Result<(), CalibrationError> {
        let Stage::Vco(_, phase) = &mut self.stage else {
            return Ok(());
        };

        let mut finished = false;
        let next = match phase {
            VcoPhase::Tuner { in_band_since } => {
                let deviation = self.tuner.deviation_cents().unsigned_abs();
                let in_band = deviation <= self.config.start_deviation_cents;
                let settle = self.config.tuner_settle;
                let since = *in_band_since;
                match since {
                    Some(since) if in_band && (since > now || now - since > settle) => {
                        self.dac.solo(channel, f32::from(self.config.floor_mv));
                        self.filter.clear();
                        Some(VcoPhase::Lower { since: now })
                    }
                    Some(_) if in_band => None,
                    _ => {
                        *in_band_since = Some(now);
                        None
                    }
                }
            }
            VcoPhase::Lower { since } => {
                let since = *since;
                (since > now || now - since > self.config.floor_settle)
                    .then(|| VcoPhase::Linearity(Sweep::start(self.config.floor_mv)))
            }
            VcoPhase::Linearity(sweep) => {
                let ceiling = self.dac.current_maximum(channel, self.gain_offsets[channel.index()]);
                let step = sweep.step(
                    now,
                    self.filter.frequency(),
                    ceiling * self.config.max_scale,
                    self.config.step_interval,
                    &mut self.matrices[channel.index()],
                )?;
                match step {
                    SweepStep::Waiting => {}
                    SweepStep::Advanced { mv, progress } => {
                        self.vco_progress = progress;
                        self.dac.solo(channel, f32::from(mv));
                    }
                    SweepStep::Finished { progress } => {
                        self.vco_progress = progress;
                        finished = true;
                    }
                }
                None
            }
        };
        if let Some(next) = next {
            *phase = next;
        }

        if finished {
            self.dac.silence();
            self.persist_matrices()?;
            info!("VCO calibration of {} done", channel);
            self.stage = Stage::Done(channel);
        }
        Ok(())
    }

    /// Millivolts that make the VCO on `channel` play `cents`.
    ///
    /// Uses the channel's matrix when it holds a completed calibration and no sweep is pending, and falls back to
    /// an ideal 1 V/octave response otherwise. Pitches outside the handled range map to 0, which must not be
    /// rendered.
    pub fn note_to_mv_cal(&self, channel: Channel, cents: u16) -> f32 {
        if !PITCH_RANGE.contains(&cents) {
            return 0.0;
        }
        if self.stage.is_calibrating_vco() {
            return note_to_mv(cents);
        }
        self.matrices[channel.index()]
            .note_to_mv(cents)
            .unwrap_or_else(|| note_to_mv(cents))
    }

    /// Whether a calibration session is engaged.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Getter.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Flat identifier of the current stage.
    pub fn stage_id(&self) -> StageId {
        self.stage.id()
    }

    /// Current VCO sweep phase.
    pub fn vco_stage(&self) -> VcoStage {
        self.stage.vco_stage()
    }

    /// Deviation measured by the tuner, in cents.
    pub fn tuner_deviation_cents(&self) -> i16 {
        self.tuner.deviation_cents()
    }

    /// Progress of the latest VCO sweep, from 0 to 1.
    pub fn vco_progress(&self) -> f32 {
        self.vco_progress
    }

    /// Getter.
    pub fn gain_offsets(&self) -> [GainOffset; 2] {
        self.gain_offsets
    }

    /// Getter.
    pub fn gain_offset(&self, channel: Channel) -> GainOffset {
        self.gain_offsets[channel.index()]
    }

    /// Getter.
    pub fn matrix(&self, channel: Channel) -> &CalibrationMatrix {
        &self.matrices[channel.index()]
    }

    /// Getter.
    pub fn dac(&self) -> &Dac {
        &self.dac
    }

    /// Access to the output targets, e.g., to render notes while no session is engaged or to update the supply.
    pub fn dac_mut(&mut self) -> &mut Dac {
        &mut self.dac
    }

    /// Compensated DAC codes for the current targets and gain offsets.
    pub fn dac_codes(&self) -> [u16; 2] {
        self.dac.codes(self.gain_offsets)
    }

    /// Getter.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
