//! The per-semitone voltage table that linearizes a VCO's response, and its serialized form.

use crate::pitch::PITCH_RANGE;

/// Lowest semitone the table covers: C0.
pub const LOWEST_NOTE: u8 = 12;

/// Highest semitone the table covers: G9.
pub const HIGHEST_NOTE: u8 = 127;

/// Number of semitones in the table.
pub const TABLE_LEN: usize = (HIGHEST_NOTE - LOWEST_NOTE) as usize + 1;

/// Bound value meaning "not calibrated" (or "calibration in progress").
pub const UNSET: u8 = 255;

/// Size of a serialized [`CalibrationMatrix`] in bytes: both bounds followed by every entry as a little-endian
/// `u16`.
pub const MATRIX_LEN: usize = 2 + 2 * TABLE_LEN;

/// Millivolt levels found to reproduce each semitone on one output channel.
///
/// Entries are indexed by `semitone - LOWEST_NOTE` and are only meaningful between the bounds. A freshly constructed
/// matrix has [`UNSET`] bounds and is therefore invalid; invalid matrices are never consulted for pitch mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationMatrix {
    note_min: u8,
    note_max: u8,
    table: [u16; TABLE_LEN],
}

impl Default for CalibrationMatrix {
    fn default() -> Self {
        Self {
            note_min: UNSET,
            note_max: UNSET,
            table: [0; TABLE_LEN],
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CalibrationMatrix {
    fn format(&self, f: defmt::Formatter) {
        if self.is_valid() {
            defmt::write!(
                f,
                "CalibrationMatrix {{ notes: {}..={}, entries: {=[?]} }}",
                self.note_min,
                self.note_max,
                self.populated()
            );
        } else {
            defmt::write!(f, "CalibrationMatrix {{ invalid }}");
        }
    }
}

impl CalibrationMatrix {
    /// Marks the matrix as uncalibrated. Entries are left in place but are no longer meaningful.
    pub fn invalidate(&mut self) {
        self.note_min = UNSET;
        self.note_max = UNSET;
    }

    /// Whether the bounds describe a usable, completed calibration.
    pub fn is_valid(&self) -> bool {
        self.note_min <= HIGHEST_NOTE
            && self.note_max <= HIGHEST_NOTE
            && self.note_min >= LOWEST_NOTE
            && self.note_min < self.note_max
    }

    /// Lowest calibrated semitone, or [`UNSET`].
    pub fn note_min(&self) -> u8 {
        self.note_min
    }

    /// Highest calibrated semitone, or [`UNSET`].
    pub fn note_max(&self) -> u8 {
        self.note_max
    }

    pub(crate) fn set_note_min(&mut self, note: u8) {
        self.note_min = note;
    }

    pub(crate) fn set_note_max(&mut self, note: u8) {
        self.note_max = note;
    }

    /// Stored millivolts of `note`, if the table covers it. Bounds are not consulted.
    pub fn entry(&self, note: u8) -> Option<u16> {
        let index = note.checked_sub(LOWEST_NOTE)?;
        self.table.get(usize::from(index)).copied()
    }

    pub(crate) fn set_entry(&mut self, index: u8, mv: u16) {
        if let Some(entry) = self.table.get_mut(usize::from(index)) {
            *entry = mv;
        }
    }

    /// Iterates over `(semitone, millivolts)` for every entry within the bounds. Empty when invalid.
    pub fn entries(&self) -> impl Iterator<Item = (u8, u16)> + '_ {
        let range = if self.is_valid() {
            self.note_min..=self.note_max
        } else {
            // an empty range
            1..=0
        };
        range.filter_map(|note| self.entry(note).map(|mv| (note, mv)))
    }

    #[cfg(feature = "defmt")]
    fn populated(&self) -> &[u16] {
        let start = usize::from(self.note_min - LOWEST_NOTE);
        let end = usize::from(self.note_max - LOWEST_NOTE) + 1;
        &self.table[start..end]
    }

    /// Serializes the matrix into its persisted layout.
    pub fn to_bytes(&self) -> [u8; MATRIX_LEN] {
        let mut bytes = [0; MATRIX_LEN];
        bytes[0] = self.note_min;
        bytes[1] = self.note_max;
        for (chunk, entry) in bytes[2..].chunks_exact_mut(2).zip(self.table.iter()) {
            chunk.copy_from_slice(&entry.to_le_bytes());
        }
        bytes
    }

    /// Deserializes the persisted layout. Erased storage reads back as an invalid matrix.
    pub fn from_bytes(bytes: &[u8; MATRIX_LEN]) -> Self {
        let mut table = [0; TABLE_LEN];
        for (entry, chunk) in table.iter_mut().zip(bytes[2..].chunks_exact(2)) {
            *entry = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self {
            note_min: bytes[0],
            note_max: bytes[1],
            table,
        }
    }

    /// Calibrated millivolts for an absolute pitch in cents, interpolating between the two bracketing semitones.
    ///
    /// Pitches at or beyond either bound are extrapolated from the outermost pair of entries. Returns `None` when the
    /// matrix is invalid or the pitch is outside [`PITCH_RANGE`].
    pub fn note_to_mv(&self, cents: u16) -> Option<f32> {
        if !self.is_valid() || !PITCH_RANGE.contains(&cents) {
            return None;
        }

        // PITCH_RANGE keeps this within u8
        let note = (cents / 100) as u8;
        let (low, high) = if note >= self.note_max {
            (self.note_max - 1, self.note_max)
        } else if note <= self.note_min {
            (self.note_min, self.note_min + 1)
        } else {
            (note, note + 1)
        };

        let low_mv = f32::from(self.entry(low)?);
        let high_mv = f32::from(self.entry(high)?);
        let position = (f32::from(cents) - f32::from(low) * 100.0) / 100.0;
        let mv = low_mv + (high_mv - low_mv) * position;
        Some(mv.max(0.0))
    }
}
