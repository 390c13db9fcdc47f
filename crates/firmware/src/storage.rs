//! Persists calibration data to the last sector of the on-chip flash.

use cv_bridge_lib::storage::{MemoryStorage, OutOfBounds, REGION_LEN, Storage};
use defmt::{Debug2Format, info, warn};
use embassy_stm32::flash::{self, Blocking, Flash, WRITE_SIZE};

/// Offset of the sector holding calibration data, relative to the start of flash.
///
/// Sector 11, the last 256 KiB of the STM32F767ZI's 2 MiB in single-bank mode.
const SECTOR_OFFSET: u32 = 0x1C_0000;
const SECTOR_SIZE: u32 = 256 * 1024;

/// Writes must be a whole number of flash words.
const SHADOW_LEN: usize = REGION_LEN.next_multiple_of(WRITE_SIZE);

/// Raised when calibration data can't be read or written.
#[derive(Debug)]
pub enum FlashStorageError {
    /// The access falls outside the calibration region.
    OutOfBounds(OutOfBounds),
    /// The flash controller reported a failure.
    Flash(flash::Error),
}

impl From<OutOfBounds> for FlashStorageError {
    fn from(err: OutOfBounds) -> Self {
        Self::OutOfBounds(err)
    }
}

impl From<flash::Error> for FlashStorageError {
    fn from(err: flash::Error) -> Self {
        Self::Flash(err)
    }
}

/// [`Storage`] backed by a flash sector.
///
/// Flash can only be rewritten a sector at a time, so the calibration region is shadowed in RAM. Reads are served
/// from the shadow; every write that changes it erases the sector and programs the whole shadow back.
pub struct FlashStorage<'d> {
    flash: Flash<'d, Blocking>,
    shadow: MemoryStorage<SHADOW_LEN>,
}

impl<'d> FlashStorage<'d> {
    /// Loads the calibration region. If flash can't be read, the shadow starts out erased.
    pub fn new(mut flash: Flash<'d, Blocking>) -> Self {
        let mut bytes = [0xFF; SHADOW_LEN];
        if let Err(err) = flash.blocking_read(SECTOR_OFFSET, &mut bytes) {
            warn!("Could not read calibration sector: {}", Debug2Format(&err));
            bytes = [0xFF; SHADOW_LEN];
        }
        Self {
            flash,
            shadow: MemoryStorage::from_bytes(bytes),
        }
    }

    fn flush(&mut self) -> Result<(), FlashStorageError> {
        info!("Writing calibration sector");
        self.flash.blocking_erase(SECTOR_OFFSET, SECTOR_OFFSET + SECTOR_SIZE)?;
        self.flash.blocking_write(SECTOR_OFFSET, self.shadow.as_bytes())?;
        Ok(())
    }
}

impl Storage for FlashStorage<'_> {
    type Error = FlashStorageError;

    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        Ok(self.shadow.read(address, buf)?)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), Self::Error> {
        let mut current = [0; SHADOW_LEN];
        let current = current
            .get_mut(..data.len())
            .ok_or(OutOfBounds { address, len: data.len() })?;
        self.shadow.read(address, current)?;
        if current == data {
            return Ok(());
        }

        self.shadow.write(address, data)?;
        self.flush()
    }
}
