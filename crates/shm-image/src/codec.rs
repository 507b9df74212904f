//! Fixed-offset binary image records.
//!
//! ```text
//! offset+0   rows     (u8)
//! offset+1   columns  (u8)
//! offset+2   r g b r g b ...   rows * columns triples, row-major
//! ```
//!
//! Encoding validates everything before the first byte is written, so a
//! failed encode leaves the destination untouched.
//!
//! A processor's answer is written as bare pixels ([`encode_pixels`]); its
//! dimensions follow from the input record and the agreed
//! [`OutputShape`](crate::layout::OutputShape).

use std::fmt;
use std::io::BufRead;

use crate::image::{Image, MAX_DIMENSION, Rgb};
use crate::ppm::{self, PpmError};

/// Bytes taken by the dimension pair.
pub const METADATA_LEN: usize = 2;

/// Size of an encoded record for the given dimensions.
#[inline]
pub const fn encoded_len(rows: usize, columns: usize) -> usize {
    METADATA_LEN + 3 * rows * columns
}

/// Size of `rows * columns` bare pixel triples.
#[inline]
pub const fn pixels_len(rows: usize, columns: usize) -> usize {
    3 * rows * columns
}

/// Encode `image` into `dst` at `offset`. Returns the number of bytes written.
pub fn encode(image: &Image, dst: &mut [u8], offset: usize) -> Result<usize, CodecError> {
    let len = encoded_len(image.rows(), image.columns());
    let record = record_range(dst.len(), offset, len)
        .ok_or(CodecError::RecordTooLarge {
            offset,
            len,
            available: dst.len(),
        })?;
    let record = &mut dst[record];

    // Dimensions were range-checked when the Image was built.
    record[0] = image.rows() as u8;
    record[1] = image.columns() as u8;
    write_pixels(image, &mut record[METADATA_LEN..]);

    Ok(len)
}

/// Encode only the pixels of `image` into `dst` at `pixel_offset`, without a
/// dimension pair. Returns the number of bytes written.
pub fn encode_pixels(image: &Image, dst: &mut [u8], pixel_offset: usize) -> Result<usize, CodecError> {
    let len = pixels_len(image.rows(), image.columns());
    let range = record_range(dst.len(), pixel_offset, len).ok_or(CodecError::RecordTooLarge {
        offset: pixel_offset,
        len,
        available: dst.len(),
    })?;
    write_pixels(image, &mut dst[range]);
    Ok(len)
}

fn write_pixels(image: &Image, dst: &mut [u8]) {
    for (chunk, px) in dst.chunks_exact_mut(3).zip(image.pixels()) {
        chunk.copy_from_slice(&[px.r, px.g, px.b]);
    }
}

/// Parse a plain PPM from `source` and encode it into `dst` at `offset`.
///
/// The source is fully parsed first; on any parse or size failure `dst` is
/// not modified.
pub fn encode_ppm<R: BufRead>(
    source: R,
    dst: &mut [u8],
    offset: usize,
) -> Result<(Image, usize), PpmError> {
    let image = ppm::parse(source)?;
    let written = encode(&image, dst, offset).map_err(PpmError::Image)?;
    Ok((image, written))
}

/// Read the `(rows, columns)` pair at `offset`.
pub fn read_dimensions(src: &[u8], offset: usize) -> Result<(usize, usize), CodecError> {
    let range = record_range(src.len(), offset, METADATA_LEN).ok_or(CodecError::Truncated {
        needed: offset.saturating_add(METADATA_LEN),
        available: src.len(),
    })?;
    let meta = &src[range];
    Ok((meta[0] as usize, meta[1] as usize))
}

/// Decode `rows * columns` pixels starting at `pixel_offset`.
///
/// The dimensions must already have been agreed (usually via
/// [`read_dimensions`] on the same record).
pub fn decode_pixels(
    src: &[u8],
    pixel_offset: usize,
    rows: usize,
    columns: usize,
) -> Result<Image, CodecError> {
    if rows > MAX_DIMENSION || columns > MAX_DIMENSION {
        return Err(CodecError::DimensionOutOfRange { rows, columns });
    }
    let len = pixels_len(rows, columns);
    let range = record_range(src.len(), pixel_offset, len).ok_or(CodecError::Truncated {
        needed: pixel_offset.saturating_add(len),
        available: src.len(),
    })?;
    let pixels = src[range]
        .chunks_exact(3)
        .map(|c| Rgb::new(c[0], c[1], c[2]))
        .collect();
    Image::new(rows, columns, pixels)
}

/// Decode a whole record at `offset`.
pub fn decode(src: &[u8], offset: usize) -> Result<Image, CodecError> {
    let (rows, columns) = read_dimensions(src, offset)?;
    decode_pixels(src, offset + METADATA_LEN, rows, columns)
}

fn record_range(available: usize, offset: usize, len: usize) -> Option<std::ops::Range<usize>> {
    let end = offset.checked_add(len)?;
    (end <= available).then_some(offset..end)
}

/// Errors from building, encoding, or decoding records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Rows or columns do not fit in one byte.
    DimensionOutOfRange { rows: usize, columns: usize },
    /// Pixel buffer length does not match the dimensions.
    PixelCountMismatch { expected: usize, found: usize },
    /// The record does not fit in the destination.
    RecordTooLarge {
        offset: usize,
        len: usize,
        available: usize,
    },
    /// The source ends before the record does.
    Truncated { needed: usize, available: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionOutOfRange { rows, columns } => write!(
                f,
                "image is {rows}x{columns}, but rows and columns must each be at most {}",
                MAX_DIMENSION
            ),
            Self::PixelCountMismatch { expected, found } => {
                write!(f, "expected {expected} pixels, found {found}")
            }
            Self::RecordTooLarge {
                offset,
                len,
                available,
            } => write!(
                f,
                "record of {len} bytes at offset {offset} does not fit in {available} bytes"
            ),
            Self::Truncated { needed, available } => {
                write!(f, "record truncated: need {needed} bytes, have {available}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_one() -> Image {
        Image::new(2, 1, vec![Rgb::new(10, 20, 30), Rgb::new(40, 50, 60)]).unwrap()
    }

    #[test]
    fn encodes_happy_path_layout() {
        let mut buf = [0u8; 8];
        let written = encode(&two_by_one(), &mut buf, 0).unwrap();
        assert_eq!(written, 8);
        assert_eq!(buf, [2, 1, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn decodes_happy_path_layout() {
        let buf = [2, 1, 10, 20, 30, 40, 50, 60];
        assert_eq!(read_dimensions(&buf, 0).unwrap(), (2, 1));
        assert_eq!(decode_pixels(&buf, 2, 2, 1).unwrap(), two_by_one());
        assert_eq!(decode(&buf, 0).unwrap(), two_by_one());
    }

    #[test]
    fn honours_offset() {
        let mut buf = [0xEEu8; 12];
        encode(&two_by_one(), &mut buf, 3).unwrap();
        assert_eq!(&buf[..3], &[0xEE; 3]);
        assert_eq!(&buf[3..11], &[2, 1, 10, 20, 30, 40, 50, 60]);
        assert_eq!(buf[11], 0xEE);
        assert_eq!(decode(&buf, 3).unwrap(), two_by_one());
    }

    #[test]
    fn too_large_leaves_destination_untouched() {
        let mut buf = [0xAAu8; 7];
        let err = encode(&two_by_one(), &mut buf, 0).unwrap_err();
        assert_eq!(
            err,
            CodecError::RecordTooLarge {
                offset: 0,
                len: 8,
                available: 7
            }
        );
        assert_eq!(buf, [0xAA; 7]);
    }

    #[test]
    fn decode_reports_truncation() {
        let buf = [2, 1, 10, 20, 30];
        assert_eq!(
            decode(&buf, 0).unwrap_err(),
            CodecError::Truncated {
                needed: 8,
                available: 5
            }
        );
        assert!(matches!(
            read_dimensions(&buf, 4),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn bare_pixels_carry_no_dimension_pair() {
        let mut buf = [0xEEu8; 10];
        let written = encode_pixels(&two_by_one(), &mut buf, 2).unwrap();
        assert_eq!(written, 6);
        assert_eq!(buf, [0xEE, 0xEE, 10, 20, 30, 40, 50, 60, 0xEE, 0xEE]);
        assert_eq!(decode_pixels(&buf, 2, 2, 1).unwrap(), two_by_one());

        let mut small = [0u8; 7];
        assert!(matches!(
            encode_pixels(&two_by_one(), &mut small, 2),
            Err(CodecError::RecordTooLarge { len: 6, .. })
        ));
        assert_eq!(small, [0; 7]);
    }

    #[test]
    fn huge_dimensions_are_rejected_not_multiplied() {
        assert_eq!(
            decode_pixels(&[0u8; 8], 0, usize::MAX, 2).unwrap_err(),
            CodecError::DimensionOutOfRange {
                rows: usize::MAX,
                columns: 2
            }
        );
        assert!(matches!(
            decode_pixels(&[0u8; 8], 0, 3, 256),
            Err(CodecError::DimensionOutOfRange { .. })
        ));
    }

    #[test]
    fn round_trips_across_dimension_and_channel_extremes() {
        for (rows, columns) in [(1, 1), (1, 255), (255, 1), (7, 13), (57, 57)] {
            let pixels = (0..rows * columns)
                .map(|i| Rgb::new((i % 256) as u8, (i * 7 % 256) as u8, 255 - (i % 256) as u8))
                .collect();
            let image = Image::new(rows, columns, pixels).unwrap();
            let mut buf = vec![0u8; encoded_len(rows, columns) + 1];
            encode(&image, &mut buf, 1).unwrap();
            assert_eq!(decode(&buf, 1).unwrap(), image, "{rows}x{columns}");
        }
    }

    #[test]
    fn malformed_ppm_leaves_destination_untouched() {
        let mut buf = [0x5Au8; 32];
        let source = "P6\n1 1\n255\n1 2 3\n".as_bytes();
        let err = encode_ppm(source, &mut buf, 1).unwrap_err();
        assert!(matches!(err, PpmError::BadMagic(_)));
        assert_eq!(buf, [0x5A; 32]);
    }

    #[test]
    fn ppm_encodes_rows_then_columns() {
        let mut buf = [0u8; 16];
        // PPM puts columns first; records put rows first.
        let source = "P3\n1 2\n255\n10 20 30\n40 50 60\n".as_bytes();
        let (image, written) = encode_ppm(source, &mut buf, 0).unwrap();
        assert_eq!(image, two_by_one());
        assert_eq!(&buf[..written], &[2, 1, 10, 20, 30, 40, 50, 60]);
    }
}
