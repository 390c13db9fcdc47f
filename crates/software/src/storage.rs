//! Byte-addressable persistence of gain encodings and calibration matrices.
//!
//! The persisted region is laid out as:
//!
//! | address            | length       | contents                            |
//! |--------------------|--------------|-------------------------------------|
//! | 0                  | 1            | channel 1 gain encoding             |
//! | 1                  | 1            | channel 2 gain encoding             |
//! | 2                  | `MATRIX_LEN` | channel 1 [`CalibrationMatrix`]     |
//! | 2 + `MATRIX_LEN`   | `MATRIX_LEN` | channel 2 [`CalibrationMatrix`]     |

use crate::calibration::{CalibrationMatrix, GainOffset, MATRIX_LEN};
use crate::dac::Channel;

/// Address of each channel's persisted gain encoding.
pub const GAIN_ADDRESSES: [usize; 2] = [0, 1];

/// Address of each channel's persisted matrix.
pub const MATRIX_ADDRESSES: [usize; 2] = [2, 2 + MATRIX_LEN];

/// Number of bytes the persisted region spans.
pub const REGION_LEN: usize = 2 + 2 * MATRIX_LEN;

/// Non-volatile, byte-addressable memory.
///
/// Implementors decide what an erased byte reads as; the layout above treats `0xFF` as "never written".
pub trait Storage {
    /// Raised when the underlying memory can't be accessed.
    type Error: core::fmt::Debug;

    /// Fills `buf` with the bytes starting at `address`.
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` starting at `address`.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Storage + ?Sized> Storage for &mut T {
    type Error = T::Error;

    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        T::read(self, address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), Self::Error> {
        T::write(self, address, data)
    }
}

/// Reads a channel's persisted gain encoding and decodes it.
pub fn load_gain<S: Storage>(storage: &mut S, channel: Channel) -> Result<GainOffset, S::Error> {
    let mut byte = [0];
    storage.read(GAIN_ADDRESSES[channel.index()], &mut byte)?;
    Ok(GainOffset::from_dip(byte[0]))
}

/// Persists a channel's gain encoding exactly as read from the DIP switch.
pub fn save_gain_encoding<S: Storage>(
    storage: &mut S,
    channel: Channel,
    encoding: u8,
) -> Result<(), S::Error> {
    storage.write(GAIN_ADDRESSES[channel.index()], &[encoding])
}

/// Reads a channel's persisted matrix.
pub fn load_matrix<S: Storage>(
    storage: &mut S,
    channel: Channel,
) -> Result<CalibrationMatrix, S::Error> {
    let mut bytes = [0; MATRIX_LEN];
    storage.read(MATRIX_ADDRESSES[channel.index()], &mut bytes)?;
    Ok(CalibrationMatrix::from_bytes(&bytes))
}

/// Persists a channel's matrix.
pub fn save_matrix<S: Storage>(
    storage: &mut S,
    channel: Channel,
    matrix: &CalibrationMatrix,
) -> Result<(), S::Error> {
    storage.write(MATRIX_ADDRESSES[channel.index()], &matrix.to_bytes())
}

/// Raised when an access falls outside a [`MemoryStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfBounds {
    /// First byte of the rejected access.
    pub address: usize,
    /// Length of the rejected access.
    pub len: usize,
}

/// [`Storage`] backed by a RAM buffer, erased to `0xFF`.
///
/// Useful for boards without non-volatile memory and as a shadow copy of slower memories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStorage<const N: usize = REGION_LEN> {
    bytes: [u8; N],
}

impl<const N: usize> Default for MemoryStorage<N> {
    fn default() -> Self {
        Self { bytes: [0xFF; N] }
    }
}

impl<const N: usize> MemoryStorage<N> {
    /// Constructs a [`MemoryStorage`] with the given contents.
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Getter.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    fn span(address: usize, len: usize) -> Result<core::ops::Range<usize>, OutOfBounds> {
        address
            .checked_add(len)
            .filter(|&end| end <= N)
            .map(|end| address..end)
            .ok_or(OutOfBounds { address, len })
    }
}

impl<const N: usize> Storage for MemoryStorage<N> {
    type Error = OutOfBounds;

    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        let span = Self::span(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[span]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), Self::Error> {
        let span = Self::span(address, data.len())?;
        self.bytes[span].copy_from_slice(data);
        Ok(())
    }
}
