//! Renders the calibration stage on a single LED.

use cv_bridge_lib::calibration::StageId;
use embassy_futures::select::{Either, select};
use embassy_stm32::gpio::Output;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    watch::{Receiver, Sender, Watch},
};
use embassy_time::Timer;

const STAGE_RECEIVER_CNT: usize = 1;
/// Publishes the calibration stage to the status display.
pub static STAGE_SYNC: Watch<CriticalSectionRawMutex, StageId, STAGE_RECEIVER_CNT> =
    Watch::new_with(StageId::None);
pub type StageSender<'a> = Sender<'a, CriticalSectionRawMutex, StageId, STAGE_RECEIVER_CNT>;
pub type StageReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, StageId, STAGE_RECEIVER_CNT>;

const CYCLE_US: u64 = 1_000_000;

/// Position of a stage in the menu that short presses cycle through.
fn menu_index(stage: StageId) -> Option<u8> {
    match stage {
        StageId::PrepGain1 => Some(0),
        StageId::PrepGain2 => Some(1),
        StageId::PrepTuner => Some(2),
        StageId::PrepVco1 => Some(3),
        StageId::PrepVco2 => Some(4),
        StageId::PrepResetVco1 => Some(5),
        StageId::PrepResetVco2 => Some(6),
        _ => None,
    }
}

/// Shows the calibration stage.
///
/// While a menu entry is selected, each cycle is divided in half. The LED remains dark for one half. For the other,
/// the LED lights up N times (where N is one more than the index of the entry). While an activity runs, the LED is
/// solid. A finished sweep blinks steadily and an error blinks rapidly. Outside calibration the LED is dark.
#[embassy_executor::task]
pub async fn display_stage(mut led: Output<'static>, mut stage: StageReceiver<'static>) -> ! {
    let mut current = stage.get().await;
    loop {
        if let Either::First(next) = select(stage.changed(), animate(&mut led, current)).await {
            current = next;
        }
    }
}

/// Plays the animation for `stage` until cancelled.
async fn animate(led: &mut Output<'_>, stage: StageId) {
    match stage {
        StageId::None => {
            led.set_low();
            core::future::pending().await
        }
        StageId::Gain1 | StageId::Gain2 | StageId::Tuner | StageId::Vco1 | StageId::Vco2 => {
            led.set_high();
            core::future::pending().await
        }
        StageId::Done => blink(led, CYCLE_US / 4).await,
        StageId::Error => blink(led, CYCLE_US / 20).await,
        menu => count(led, menu_index(menu).unwrap_or_default()).await,
    }
}

async fn blink(led: &mut Output<'_>, half_period_us: u64) {
    loop {
        led.toggle();
        Timer::after_micros(half_period_us).await;
    }
}

async fn count(led: &mut Output<'_>, index: u8) {
    // since the index starts with 0, 1 is added or else the LED wouldn't blink at all for the first entry
    let blink_cnt = index.saturating_add(1);
    // mult by two to account for the "off" periods, sub 1 so the LED always starts and ends lit
    let animation_frames = blink_cnt * 2 - 1;
    loop {
        led.set_low();
        Timer::after_micros(CYCLE_US).await;

        for _ in 0..animation_frames {
            led.toggle();
            Timer::after_micros(CYCLE_US / u64::from(animation_frames)).await;
        }
    }
}
