//! The requestor's control loop.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::codec::{CodecError, pixels_len};
use crate::handshake::{HandshakeError, Requestor};
use crate::image::Image;
use crate::layout::{INPUT_RECORD_OFFSET, OutputShape, SegmentLayout};
use crate::ppm::{self, PpmError};
use crate::segment::SharedMemory;

/// Where session inputs come from.
pub trait ImageSource {
    fn load(&mut self, index: usize) -> Result<Image, LoadError>;
}

/// A directory of `img{index}.ppm` files.
#[derive(Debug, Clone)]
pub struct PpmDirectory {
    dir: PathBuf,
}

impl PpmDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the image with the given index.
    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("img{index}.ppm"))
    }
}

impl ImageSource for PpmDirectory {
    fn load(&mut self, index: usize) -> Result<Image, LoadError> {
        let path = self.path_for(index);
        ppm::load(&path).map_err(|source| LoadError::Ppm { path, source })
    }
}

/// Pre-built images, mostly for tests. `None` entries fail to load.
impl ImageSource for Vec<Option<Image>> {
    fn load(&mut self, index: usize) -> Result<Image, LoadError> {
        self.get(index)
            .cloned()
            .flatten()
            .ok_or(LoadError::Unavailable { index })
    }
}

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub index: usize,
    pub input: Image,
    pub output: Image,
}

/// An index that never reached the processor.
#[derive(Debug)]
pub struct Skipped {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub enum SkipReason {
    /// The source could not be loaded or parsed.
    Load(LoadError),
    /// The image does not fit in the segment.
    TooLarge(CodecError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(e) => write!(f, "{e}"),
            Self::TooLarge(e) => write!(f, "{e}"),
        }
    }
}

/// Outcome of a whole session, in index order.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub exchanges: Vec<Exchange>,
    pub skipped: Vec<Skipped>,
}

/// Drives `count` exchanges over a [`Requestor`], then ends the session.
pub struct Session<M, S> {
    requestor: Requestor<M>,
    source: S,
    count: usize,
    output_shape: OutputShape,
}

impl<M: SharedMemory, S: ImageSource> Session<M, S> {
    /// A session expecting one pixel per input row back
    /// ([`OutputShape::RowsByOne`]).
    pub fn new(requestor: Requestor<M>, source: S, count: usize) -> Self {
        Self {
            requestor,
            source,
            count,
            output_shape: OutputShape::default(),
        }
    }

    /// Expect outputs of `shape`. Must match the processor's.
    pub fn with_output_shape(mut self, shape: OutputShape) -> Self {
        self.output_shape = shape;
        self
    }

    /// Run every exchange and collect the results.
    pub fn run(self) -> Result<SessionReport, SessionError> {
        self.run_with(|_| {})
    }

    /// Like [`run`](Session::run), but also hands each exchange to
    /// `on_exchange` as soon as its output is decoded.
    pub fn run_with(
        mut self,
        mut on_exchange: impl FnMut(&Exchange),
    ) -> Result<SessionReport, SessionError> {
        tracing::info!(count = self.count, "session started");
        let mut report = SessionReport::default();

        for index in 0..self.count {
            let input = match self.source.load(index) {
                Ok(image) => image,
                Err(error) => {
                    tracing::warn!(index, %error, "skipping image");
                    report.skipped.push(Skipped {
                        index,
                        reason: SkipReason::Load(error),
                    });
                    continue;
                }
            };

            if let Err(error) = check_capacity(self.requestor.layout(), self.output_shape, &input) {
                tracing::warn!(index, %error, "skipping image");
                report.skipped.push(Skipped {
                    index,
                    reason: SkipReason::TooLarge(error),
                });
                continue;
            }

            let mut turn = self.requestor.acquire()?;
            if let Err(error) = turn.write_input(&input) {
                // Still holding the segment; the next index reuses the turn.
                tracing::warn!(index, %error, "skipping image");
                report.skipped.push(Skipped {
                    index,
                    reason: SkipReason::TooLarge(error),
                });
                continue;
            }
            turn.submit()?;

            let turn = self.requestor.acquire()?;
            let output = match turn.read_output(self.output_shape) {
                Ok(output) => output,
                Err(source) => {
                    // Let the processor go before giving up.
                    tracing::error!(index, error = %source, "undecodable output, ending session");
                    if let Err(error) = turn.finish() {
                        tracing::error!(%error, "could not end the session");
                    }
                    return Err(SessionError::Output { index, source });
                }
            };
            drop(turn);

            let exchange = Exchange {
                index,
                input,
                output,
            };
            tracing::debug!(
                index,
                rows = exchange.output.rows(),
                columns = exchange.output.columns(),
                "exchange complete"
            );
            on_exchange(&exchange);
            report.exchanges.push(exchange);
        }

        self.requestor.acquire()?.finish()?;
        tracing::info!(
            exchanged = report.exchanges.len(),
            skipped = report.skipped.len(),
            "session finished"
        );
        Ok(report)
    }
}

/// The input record must leave room for the output pixels `shape` implies.
fn check_capacity(
    layout: SegmentLayout,
    shape: OutputShape,
    input: &Image,
) -> Result<(), CodecError> {
    let (rows, columns) = shape.dimensions(input.rows(), input.columns());
    let needed = layout.output_offset(input.rows(), input.columns()) + pixels_len(rows, columns);
    if needed > layout.data_len() {
        return Err(CodecError::RecordTooLarge {
            offset: INPUT_RECORD_OFFSET,
            len: needed,
            available: layout.data_len(),
        });
    }
    Ok(())
}

/// A session input could not be loaded.
#[derive(Debug)]
pub enum LoadError {
    Ppm { path: PathBuf, source: PpmError },
    /// The source has nothing at this index.
    Unavailable { index: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ppm { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Unavailable { index } => write!(f, "no image at index {index}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ppm { source, .. } => Some(source),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Errors that abort a session.
#[derive(Debug)]
pub enum SessionError {
    Handshake(HandshakeError),
    /// The processor's output could not be decoded. The session was ended
    /// (`NO_MORE_INPUT`) before this was returned.
    Output { index: usize, source: CodecError },
}

impl From<HandshakeError> for SessionError {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Output { index, source } => {
                write!(f, "bad output for image {index}: {source}")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(e) => Some(e),
            Self::Output { source, .. } => Some(source),
        }
    }
}
