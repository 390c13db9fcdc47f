//! The calibration session's stages and how button presses move between them.
//!
//! Short presses cycle through the [`Prep`] menu; long presses start (or confirm) whatever the menu points at. A
//! transition never touches hardware itself. Instead it names an [`Effect`] for the engine to carry out.

use super::button::ButtonEvent;
use super::sweep::VcoPhase;
use crate::configuration::CycleConfig;
use crate::dac::Channel;
use num_derive::{FromPrimitive, ToPrimitive};

/// The menu of calibration activities, in the order short presses visit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prep {
    /// Trim the gain of channel 1.
    Gain1,
    /// Trim the gain of channel 2.
    Gain2,
    /// Use both outputs as a tuner.
    Tuner,
    /// Sweep the VCO attached to channel 1.
    Vco1,
    /// Sweep the VCO attached to channel 2.
    Vco2,
    /// Discard channel 1's matrix.
    ResetVco1,
    /// Discard channel 2's matrix.
    ResetVco2,
}

impl CycleConfig for Prep {}

/// Where a calibration session is. Each activity carries only the state it needs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// Calibration isn't engaged.
    Idle,
    /// An activity is selected but not running.
    Prep(Prep),
    /// A channel's gain is being trimmed from the DIP switch.
    Gain(Channel),
    /// Both outputs play the DIP-selected note while the deviation is measured.
    Tuner,
    /// A channel's VCO is being swept.
    Vco(Channel, VcoPhase),
    /// A channel's VCO sweep completed.
    Done(Channel),
    /// Something went wrong; the outputs stay silent for the rest of the session.
    Error,
}

/// Side effect requested by a [`Transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    /// Nothing.
    None,
    /// Zero both outputs.
    Silence,
    /// Begin driving a channel at its gain calibration voltage.
    DriveGain(Channel),
    /// Save the DIP switch state as a channel's gain encoding and zero the outputs.
    PersistGain(Channel),
    /// Begin tuning.
    StartTuner,
    /// Stop tuning and zero the outputs.
    ExitTuner,
    /// Invalidate a channel's matrix and begin sweeping its VCO.
    StartVco(Channel),
    /// Invalidate a channel's matrix and save the result.
    ResetMatrix(Channel),
}

/// The result of a button press.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The stage to move to.
    pub next: Stage,
    /// What has to happen on the way.
    pub effect: Effect,
}

impl Transition {
    fn to(next: Stage, effect: Effect) -> Self {
        Self { next, effect }
    }
}

/// Stage identifiers without any stage data, for observers such as a status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum StageId {
    None,
    PrepGain1,
    Gain1,
    PrepGain2,
    Gain2,
    PrepTuner,
    Tuner,
    PrepVco1,
    Vco1,
    PrepVco2,
    Vco2,
    PrepResetVco1,
    PrepResetVco2,
    Done,
    Error,
}

/// VCO sweep phase identifiers, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum VcoStage {
    None,
    Tuner,
    Lower,
    Linearity,
}

impl Stage {
    /// Where a button press leads.
    pub fn on_button(self, event: ButtonEvent) -> Transition {
        match event {
            ButtonEvent::Short => self.on_short_press(),
            ButtonEvent::Long => self.on_long_press(),
        }
    }

    fn on_short_press(self) -> Transition {
        match self {
            Self::Prep(prep) => Transition::to(Self::Prep(prep.cycle()), Effect::Silence),
            Self::Done(Channel::One) => Transition::to(Self::Prep(Prep::Vco2), Effect::Silence),
            Self::Done(Channel::Two) => {
                Transition::to(Self::Prep(Prep::ResetVco1), Effect::Silence)
            }
            stage => Transition::to(stage, Effect::None),
        }
    }

    fn on_long_press(self) -> Transition {
        match self {
            Self::Prep(Prep::Gain1) => {
                Transition::to(Self::Gain(Channel::One), Effect::DriveGain(Channel::One))
            }
            Self::Prep(Prep::Gain2) => {
                Transition::to(Self::Gain(Channel::Two), Effect::DriveGain(Channel::Two))
            }
            Self::Gain(Channel::One) => {
                Transition::to(Self::Prep(Prep::Gain2), Effect::PersistGain(Channel::One))
            }
            Self::Gain(Channel::Two) => {
                Transition::to(Self::Prep(Prep::Tuner), Effect::PersistGain(Channel::Two))
            }
            Self::Prep(Prep::Tuner) => Transition::to(Self::Tuner, Effect::StartTuner),
            Self::Tuner => Transition::to(Self::Prep(Prep::Vco1), Effect::ExitTuner),
            Self::Prep(Prep::Vco1) => Transition::to(
                Self::Vco(Channel::One, VcoPhase::default()),
                Effect::StartVco(Channel::One),
            ),
            Self::Prep(Prep::Vco2) => Transition::to(
                Self::Vco(Channel::Two, VcoPhase::default()),
                Effect::StartVco(Channel::Two),
            ),
            Self::Prep(Prep::ResetVco1) => {
                Transition::to(Self::Prep(Prep::ResetVco2), Effect::ResetMatrix(Channel::One))
            }
            Self::Prep(Prep::ResetVco2) => {
                Transition::to(Self::Prep(Prep::Gain1), Effect::ResetMatrix(Channel::Two))
            }
            stage => Transition::to(stage, Effect::None),
        }
    }

    /// The stage's identifier.
    pub fn id(&self) -> StageId {
        match self {
            Self::Idle => StageId::None,
            Self::Prep(Prep::Gain1) => StageId::PrepGain1,
            Self::Prep(Prep::Gain2) => StageId::PrepGain2,
            Self::Prep(Prep::Tuner) => StageId::PrepTuner,
            Self::Prep(Prep::Vco1) => StageId::PrepVco1,
            Self::Prep(Prep::Vco2) => StageId::PrepVco2,
            Self::Prep(Prep::ResetVco1) => StageId::PrepResetVco1,
            Self::Prep(Prep::ResetVco2) => StageId::PrepResetVco2,
            Self::Gain(Channel::One) => StageId::Gain1,
            Self::Gain(Channel::Two) => StageId::Gain2,
            Self::Tuner => StageId::Tuner,
            Self::Vco(Channel::One, _) => StageId::Vco1,
            Self::Vco(Channel::Two, _) => StageId::Vco2,
            Self::Done(_) => StageId::Done,
            Self::Error => StageId::Error,
        }
    }

    /// The VCO sweep phase, or [`VcoStage::None`] outside a sweep.
    pub fn vco_stage(&self) -> VcoStage {
        match self {
            Self::Vco(_, VcoPhase::Tuner { .. }) => VcoStage::Tuner,
            Self::Vco(_, VcoPhase::Lower { .. }) => VcoStage::Lower,
            Self::Vco(_, VcoPhase::Linearity(_)) => VcoStage::Linearity,
            _ => VcoStage::None,
        }
    }

    /// Whether a VCO sweep is selected or running, during which calibrated pitch mapping is unavailable.
    pub fn is_calibrating_vco(&self) -> bool {
        matches!(
            self,
            Self::Prep(Prep::Vco1) | Self::Prep(Prep::Vco2) | Self::Vco(..)
        )
    }
}
