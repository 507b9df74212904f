//! In-memory raster images.

use crate::codec::CodecError;

/// Largest row or column count a record can carry (one byte each).
pub const MAX_DIMENSION: usize = u8::MAX as usize;

/// One pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.r, self.g, self.b)
    }
}

/// A row-major image whose dimensions fit in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    rows: usize,
    columns: usize,
    pixels: Vec<Rgb>,
}

impl Image {
    /// Build an image, rejecting dimensions over [`MAX_DIMENSION`] and pixel
    /// buffers of the wrong length.
    pub fn new(rows: usize, columns: usize, pixels: Vec<Rgb>) -> Result<Self, CodecError> {
        if rows > MAX_DIMENSION || columns > MAX_DIMENSION {
            return Err(CodecError::DimensionOutOfRange { rows, columns });
        }
        if pixels.len() != rows * columns {
            return Err(CodecError::PixelCountMismatch {
                expected: rows * columns,
                found: pixels.len(),
            });
        }
        Ok(Self {
            rows,
            columns,
            pixels,
        })
    }

    /// A 0×0 image.
    pub fn empty() -> Self {
        Self {
            rows: 0,
            columns: 0,
            pixels: Vec::new(),
        }
    }

    /// A `rows × columns` image with every pixel black.
    pub fn blank(rows: usize, columns: usize) -> Result<Self, CodecError> {
        if rows > MAX_DIMENSION || columns > MAX_DIMENSION {
            return Err(CodecError::DimensionOutOfRange { rows, columns });
        }
        Self::new(rows, columns, vec![Rgb::default(); rows * columns])
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    #[inline]
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    /// Pixel at (`row`, `column`), if in bounds.
    pub fn get(&self, row: usize, column: usize) -> Option<Rgb> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.pixels.get(row * self.columns + column).copied()
    }

    /// Iterate rows as pixel slices.
    pub fn row_slices(&self) -> impl Iterator<Item = &[Rgb]> {
        // chunks() rejects 0; a zero-column image has no pixels anyway.
        self.pixels.chunks(self.columns.max(1))
    }

    pub fn into_pixels(self) -> Vec<Rgb> {
        self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_dimensions() {
        let err = Image::new(256, 1, vec![Rgb::default(); 256]).unwrap_err();
        assert_eq!(
            err,
            CodecError::DimensionOutOfRange {
                rows: 256,
                columns: 1
            }
        );
    }

    #[test]
    fn rejects_wrong_pixel_count() {
        let err = Image::new(2, 2, vec![Rgb::default(); 3]).unwrap_err();
        assert_eq!(
            err,
            CodecError::PixelCountMismatch {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn indexes_row_major() {
        let pixels = (0..6).map(|i| Rgb::new(i, i, i)).collect();
        let image = Image::new(2, 3, pixels).unwrap();
        assert_eq!(image.get(1, 0), Some(Rgb::new(3, 3, 3)));
        assert_eq!(image.get(0, 2), Some(Rgb::new(2, 2, 2)));
        assert_eq!(image.get(2, 0), None);
        assert_eq!(image.row_slices().count(), 2);
    }

    #[test]
    fn blank_image_is_black() {
        let image = Image::blank(3, 1).unwrap();
        assert_eq!(image.pixels(), &[Rgb::default(); 3]);
        assert!(Image::blank(1, 300).is_err());
    }

    #[test]
    fn empty_image_has_no_rows() {
        let image = Image::empty();
        assert_eq!(image.row_slices().count(), 0);
    }
}
