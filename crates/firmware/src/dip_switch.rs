//! Reads the eight-position DIP switch, wired as a matrix of two rows by four columns.

use embassy_stm32::gpio::{Input, Output};

/// Cycles to wait after selecting a row before its columns are sampled.
const ROW_SETTLE_CYCLES: u32 = 64;

/// A DIP switch scanned one row at a time.
///
/// Rows are driven low to select them and idle high; columns are pulled up, so a closed switch reads low. Each
/// switch is expected to sit behind a diode so that closed switches in other rows don't ghost.
pub struct DipSwitch<'d> {
    rows: [Output<'d>; 2],
    columns: [Input<'d>; 4],
}

impl<'d> DipSwitch<'d> {
    /// Constructs a [`DipSwitch`]; every row should already be high.
    pub fn new(rows: [Output<'d>; 2], columns: [Input<'d>; 4]) -> Self {
        Self { rows, columns }
    }

    /// Returns the state of all eight switches, the first switch in the most significant bit.
    pub fn read(&mut self) -> u8 {
        let mut state = 0;
        for row in self.rows.iter_mut() {
            row.set_low();
            cortex_m::asm::delay(ROW_SETTLE_CYCLES);
            for column in self.columns.iter() {
                state = (state << 1) | u8::from(column.is_low());
            }
            row.set_high();
        }
        state
    }
}
