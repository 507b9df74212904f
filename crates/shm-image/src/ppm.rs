//! Plain-text PPM (`P3`) reader.
//!
//! ```text
//! P3
//! <columns> <rows>
//! <max value>
//! r g b r g b ...
//! ```
//!
//! `#` comments are skipped after the magic line. Channel values must fit a
//! byte; the max value is validated but otherwise unused.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::codec::CodecError;
use crate::image::{Image, MAX_DIMENSION, Rgb};

/// The only accepted format tag.
pub const MAGIC: &str = "P3";

/// Read and parse the PPM file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Image, PpmError> {
    let file = File::open(path.as_ref()).map_err(PpmError::Io)?;
    parse(BufReader::new(file))
}

/// Parse a PPM image from `source`.
pub fn parse<R: BufRead>(mut source: R) -> Result<Image, PpmError> {
    let mut magic = String::new();
    source.read_line(&mut magic).map_err(PpmError::Io)?;
    let magic = magic.trim_end_matches(['\r', '\n']);
    if magic != MAGIC {
        return Err(PpmError::BadMagic(magic.to_string()));
    }

    let mut body = String::new();
    source.read_to_string(&mut body).map_err(PpmError::Io)?;
    let mut tokens = Tokens::new(&body);

    let columns = tokens.next_value("column count", u32::MAX)? as usize;
    let rows = tokens.next_value("row count", u32::MAX)? as usize;
    if rows > MAX_DIMENSION || columns > MAX_DIMENSION {
        return Err(PpmError::Image(CodecError::DimensionOutOfRange { rows, columns }));
    }
    let max_value = tokens.next_value("max value", 65535)?;
    if max_value == 0 {
        return Err(PpmError::ValueOutOfRange {
            what: "max value",
            value: 0,
            max: 65535,
        });
    }

    let mut pixels = Vec::with_capacity(rows * columns);
    for _ in 0..rows * columns {
        let r = tokens.next_value("red channel", 255)? as u8;
        let g = tokens.next_value("green channel", 255)? as u8;
        let b = tokens.next_value("blue channel", 255)? as u8;
        pixels.push(Rgb::new(r, g, b));
    }

    Image::new(rows, columns, pixels).map_err(PpmError::Image)
}

struct Tokens<'a> {
    lines: std::str::Lines<'a>,
    current: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(body: &'a str) -> Self {
        Self {
            lines: body.lines(),
            current: "".split_whitespace(),
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        loop {
            if let Some(token) = self.current.next() {
                return Some(token);
            }
            let line = self.lines.next()?;
            let line = line.split_once('#').map_or(line, |(data, _comment)| data);
            self.current = line.split_whitespace();
        }
    }

    fn next_value(&mut self, what: &'static str, max: u32) -> Result<u32, PpmError> {
        let token = self.next_token().ok_or(PpmError::MissingValue(what))?;
        let value: u64 = token.parse().map_err(|_| PpmError::InvalidValue {
            what,
            token: token.to_string(),
        })?;
        if value > max as u64 {
            return Err(PpmError::ValueOutOfRange { what, value, max });
        }
        Ok(value as u32)
    }
}

/// Errors from reading a PPM source.
#[derive(Debug)]
pub enum PpmError {
    /// The source could not be read.
    Io(io::Error),
    /// The first line is not `P3`.
    BadMagic(String),
    /// The source ended early.
    MissingValue(&'static str),
    /// A token is not a non-negative integer.
    InvalidValue { what: &'static str, token: String },
    /// A value is out of range (channels must fit a byte).
    ValueOutOfRange {
        what: &'static str,
        value: u64,
        max: u32,
    },
    /// The parsed image cannot be represented or encoded.
    Image(CodecError),
}

impl fmt::Display for PpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadMagic(found) => {
                write!(f, "unexpected format tag {found:?}, expected {MAGIC:?}")
            }
            Self::MissingValue(what) => write!(f, "unexpected end of input, missing {what}"),
            Self::InvalidValue { what, token } => write!(f, "invalid {what}: {token:?}"),
            Self::ValueOutOfRange { what, value, max } => {
                write!(f, "{what} {value} out of range (max {max})")
            }
            Self::Image(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PpmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Image(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_columns_before_rows() {
        let image = parse("P3\n3 1\n255\n1 2 3  4 5 6  7 8 9\n".as_bytes()).unwrap();
        assert_eq!(image.rows(), 1);
        assert_eq!(image.columns(), 3);
        assert_eq!(image.get(0, 2), Some(Rgb::new(7, 8, 9)));
    }

    #[test]
    fn accepts_crlf_and_comments() {
        let src = "P3\r\n# made by hand\n1 1 # one pixel\n255\n0 128 255\n";
        let image = parse(src.as_bytes()).unwrap();
        assert_eq!(image.pixels(), &[Rgb::new(0, 128, 255)]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let err = parse("P6\n1 1\n255\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PpmError::BadMagic(ref m) if m == "P6"));
    }

    #[test]
    fn rejects_magic_with_trailing_junk() {
        // The tag line must be exactly the marker.
        assert!(matches!(
            parse("P3 1 1 255\n1 2 3\n".as_bytes()),
            Err(PpmError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_channel_overflow_instead_of_wrapping() {
        let err = parse("P3\n1 1\n65535\n256 0 0\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            PpmError::ValueOutOfRange {
                what: "red channel",
                value: 256,
                max: 255
            }
        ));
    }

    #[test]
    fn rejects_dimension_overflow_before_reading_pixels() {
        let err = parse("P3\n300 1\n255\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            PpmError::Image(CodecError::DimensionOutOfRange {
                rows: 1,
                columns: 300
            })
        ));
    }

    #[test]
    fn reports_missing_pixels() {
        let err = parse("P3\n2 1\n255\n1 2 3 4\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PpmError::MissingValue("green channel")));
    }

    #[test]
    fn reports_garbage_tokens() {
        let err = parse("P3\n1 1\n255\n1 two 3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PpmError::InvalidValue { what: "green channel", .. }));
    }

    #[test]
    fn rejects_zero_max_value() {
        assert!(matches!(
            parse("P3\n1 1\n0\n0 0 0\n".as_bytes()),
            Err(PpmError::ValueOutOfRange { what: "max value", .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join(format!("no_such_{}.ppm", std::process::id()));
        assert!(matches!(load(&path), Err(PpmError::Io(_))));
    }
}
