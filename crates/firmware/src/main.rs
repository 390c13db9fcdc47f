//! CV Bridge is [Embassy](https://embassy.dev)-based firmware for a dual-channel MIDI to CV/gate interface. It runs
//! on the [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is
//! powered by an F7-series STM32 microcontroller.
//!
//! Both CV outputs are driven by the on-chip DAC through a non-inverting amplifier. Holding the calibration button
//! at power-up enters a guided calibration session (see [`cv_bridge_lib::calibration`]) that trims each amplifier's
//! gain and measures an attached VCO to linearize its response. Otherwise both outputs hold the calibrated voltage
//! of middle C.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod dip_switch;
mod status;
mod storage;

use crate::{
    dip_switch::DipSwitch,
    status::{STAGE_SYNC, StageSender},
    storage::FlashStorage,
};
use cv_bridge_lib::{
    calibration::{CalibrationEngine, FrequencyCapture},
    configuration::CalibrationConfig,
    dac::{Channel, Dac as OutputStage},
};
use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::{
    Config,
    adc::{Adc, VrefInt},
    dac::{Dac, DacCh1, DacCh2, Value},
    exti::ExtiInput,
    flash::Flash,
    gpio::{Input, Level, Output, Pull, Speed},
    mode::Async,
    peripherals::{ADC1, DAC1},
    time::Hertz,
};
use embassy_time::{Duration, Instant, Ticker, Timer};

use defmt_rtt as _;
#[cfg(not(feature = "panic-probe"))]
use panic_halt as _;
#[cfg(feature = "panic-probe")]
use panic_probe as _;

/// Shared between the edge capture task and the control loop.
static FREQUENCY_CAPTURE: FrequencyCapture = FrequencyCapture::new();

type Engine = CalibrationEngine<'static, Input<'static>, FlashStorage<'static>>;

/// Period of the control loop.
const CONTROL_PERIOD: Duration = Duration::from_millis(1);

/// Pitch both outputs hold while calibration isn't engaged: C4.
const DEFAULT_NOTE_CENTS: u16 = 6000;

/// Typical voltage of the internal reference, per the STM32F767 datasheet (DS11532).
const VREFINT_MV: f32 = 1210.0;

/// Full-scale reading of the 12-bit ADC.
const ADC_FULL_SCALE: u16 = 4095;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing CV Bridge");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            divq: None,
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
    }
    let p = embassy_stm32::init(config);

    let button = Input::new(p.PD1, Pull::Up);
    let storage = FlashStorage::new(Flash::new_blocking(p.FLASH));

    let mut adc = Adc::new(p.ADC1);
    let mut vrefint = adc.enable_vrefint();

    // let the button's pull-up and the internal reference settle
    Timer::after_millis(10).await;

    let mut output_stage = OutputStage::default();
    let reference = adc.blocking_read(&mut vrefint);
    output_stage.set_supply_from_reference(VREFINT_MV, reference, ADC_FULL_SCALE);
    info!("Supply: {} mV", output_stage.supply().as_millivolts());

    let mut engine = CalibrationEngine::new(
        CalibrationConfig::default(),
        button,
        storage,
        &FREQUENCY_CAPTURE,
        output_stage,
    );
    if engine.init_check(Instant::now()) {
        // the VCO under calibration is fed into port A, pin 0
        let vco = ExtiInput::new(p.PA0, p.EXTI0, Pull::Up);
        unwrap!(spawner.spawn(capture_edges(vco)));
    }

    // per RM0410 (the reference manual for the chip), DAC channel 1 outputs on port A, pin 4 and channel 2 on pin 5
    // DMA: direct memory access controller
    let (dac_ch1, dac_ch2) = Dac::new(p.DAC1, p.DMA1_CH5, p.DMA1_CH6, p.PA4, p.PA5).split();

    let dip_switch = DipSwitch::new(
        [
            Output::new(p.PG2, Level::High, Speed::Low),
            Output::new(p.PG3, Level::High, Speed::Low),
        ],
        [
            Input::new(p.PD4, Pull::Up),
            Input::new(p.PD5, Pull::Up),
            Input::new(p.PD6, Pull::Up),
            Input::new(p.PD7, Pull::Up),
        ],
    );

    let green_led = Output::new(p.PB0, Level::Low, Speed::Low);
    let stage_receiver = unwrap!(STAGE_SYNC.receiver());
    unwrap!(spawner.spawn(status::display_stage(green_led, stage_receiver)));

    unwrap!(spawner.spawn(control_loop(
        engine,
        dip_switch,
        dac_ch1,
        dac_ch2,
        adc,
        vrefint,
        STAGE_SYNC.sender()
    )));
}

/// Timestamps falling edges of the VCO under calibration.
#[embassy_executor::task]
async fn capture_edges(mut vco: ExtiInput<'static>) -> ! {
    loop {
        vco.wait_for_falling_edge().await;
        FREQUENCY_CAPTURE.on_edge(Instant::now());
    }
}

/// Fixed-rate loop that advances calibration and renders both CV outputs.
#[embassy_executor::task]
async fn control_loop(
    mut engine: Engine,
    mut dip_switch: DipSwitch<'static>,
    mut dac_ch1: DacCh1<'static, DAC1, Async>,
    mut dac_ch2: DacCh2<'static, DAC1, Async>,
    mut adc: Adc<'static, ADC1>,
    mut vrefint: VrefInt,
    stage: StageSender<'static>,
) -> ! {
    let mut ticker = Ticker::every(CONTROL_PERIOD);
    let mut published = None;

    loop {
        let dip = dip_switch.read();
        if engine.is_active() {
            engine.step(dip, Instant::now());
        } else {
            let [mv_1, mv_2] = [Channel::One, Channel::Two]
                .map(|channel| engine.note_to_mv_cal(channel, DEFAULT_NOTE_CENTS));
            engine.dac_mut().set(Some(mv_1), Some(mv_2));
        }

        let reference = adc.blocking_read(&mut vrefint);
        engine
            .dac_mut()
            .set_supply_from_reference(VREFINT_MV, reference, ADC_FULL_SCALE);

        let [code_1, code_2] = engine.dac_codes();
        dac_ch1.set(Value::Bit12Right(code_1));
        dac_ch2.set(Value::Bit12Right(code_2));

        let stage_id = engine.stage_id();
        if published != Some(stage_id) {
            stage.send(stage_id);
            published = Some(stage_id);
        }

        ticker.next().await;
    }
}
