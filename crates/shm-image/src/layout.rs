//! Segment layout.
//!
//! ```text
//! ┌────────┬──────────────────────────────┬─────────────────────────┬────────┐
//! │ header │ input record                 │ output pixels           │ unused │
//! │ 1 byte │ rows, cols, rows*cols*3      │ out_rows*out_cols*3     │        │
//! └────────┴──────────────────────────────┴─────────────────────────┴────────┘
//! 0        1                              3 + 3*rows*cols
//! ```
//!
//! Offsets below are relative to the data area, which starts right after the
//! header. The input record's metadata therefore sits at segment offset 1 and
//! its pixels at segment offset 3. The output area carries no dimensions of
//! its own: both sides derive them from the input through an [`OutputShape`].

use shm_primitives::HEADER_LEN;

use crate::codec::{METADATA_LEN, encoded_len, pixels_len};

/// Well-known name of the segment.
pub const DEFAULT_SEGMENT_NAME: &str = "/SHM_IMG_PROCESSOR";

/// Capacity of the segment in bytes, header included.
pub const DEFAULT_SEGMENT_SIZE: usize = 100_000;

/// Data-area offset of the input record.
pub const INPUT_RECORD_OFFSET: usize = 0;

/// How the output dimensions follow from the input dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputShape {
    /// Same rows and columns as the input.
    SameAsInput,
    /// One pixel per input row.
    #[default]
    RowsByOne,
}

impl OutputShape {
    /// Output `(rows, columns)` for an input of `rows` × `columns`.
    #[inline]
    pub const fn dimensions(self, rows: usize, columns: usize) -> (usize, usize) {
        match self {
            Self::SameAsInput => (rows, columns),
            Self::RowsByOne => (rows, 1),
        }
    }
}

/// Geometry of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Total segment size in bytes, header included.
    pub size: usize,
}

impl Default for SegmentLayout {
    fn default() -> Self {
        Self {
            size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl SegmentLayout {
    pub const fn new(size: usize) -> Self {
        Self { size }
    }

    /// Smallest usable segment: a header plus an empty input record.
    pub const fn min_size() -> usize {
        HEADER_LEN + METADATA_LEN
    }

    /// Segment offset where the data area starts.
    #[inline]
    pub const fn data_offset(&self) -> usize {
        HEADER_LEN
    }

    /// Length of the data area.
    #[inline]
    pub const fn data_len(&self) -> usize {
        self.size.saturating_sub(HEADER_LEN)
    }

    /// Data-area offset of the output pixels, which follow the input record.
    #[inline]
    pub const fn output_offset(&self, input_rows: usize, input_columns: usize) -> usize {
        INPUT_RECORD_OFFSET + encoded_len(input_rows, input_columns)
    }

    /// Whether an input of these dimensions leaves room for an output of
    /// `output_rows` × `output_columns`.
    pub const fn fits(
        &self,
        input: (usize, usize),
        output: (usize, usize),
    ) -> bool {
        self.output_offset(input.0, input.1) + pixels_len(output.0, output.1) <= self.data_len()
    }
}
