//! Image exchange over a named shared memory segment.
//!
//! Two processes map the same segment and take turns owning it. The first
//! byte is a handshake header (see [`shm_primitives::HandshakeState`]); the
//! rest holds an input record written by the [`Requestor`]
//!
//! ```text
//! rows: u8 | columns: u8 | rows * columns * (r, g, b)
//! ```
//!
//! followed directly by the [`Processor`]'s answer as bare `(r, g, b)`
//! triples. Both sides agree on the answer's dimensions through an
//! [`OutputShape`].
//!
//! A typical requestor:
//!
//! ```no_run
//! use shm_image::{PpmDirectory, Requestor, Segment, Session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let segment = Segment::attach(&config.segment_name, config.layout)?;
//! let requestor = Requestor::new(segment, config.layout, config.wait)?;
//! let source = PpmDirectory::new(&config.image_dir);
//! let report = Session::new(requestor, source, config.image_count)
//!     .with_output_shape(config.output_shape)
//!     .run()?;
//! for exchange in &report.exchanges {
//!     println!("{}: {} rows", exchange.index, exchange.output.rows());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod handshake;
pub mod image;
pub mod layout;
pub mod ppm;
pub mod processor;
pub mod segment;
pub mod session;
pub mod wait;

pub use codec::CodecError;
pub use config::{ProcessorConfig, SessionConfig};
pub use handshake::{HandshakeError, Processor, ProcessorTurn, Requestor, RequestorTurn};
pub use image::{Image, Rgb};
pub use layout::{DEFAULT_SEGMENT_NAME, DEFAULT_SEGMENT_SIZE, OutputShape, SegmentLayout};
pub use ppm::PpmError;
pub use processor::{Echo, ImageProcessor, RowColours};
pub use segment::{Segment, SegmentError, SharedMemory};
pub use session::{
    Exchange, ImageSource, LoadError, PpmDirectory, Session, SessionError, SessionReport,
    SkipReason, Skipped,
};
pub use shm_primitives::{HandshakeState, Role};
pub use wait::{CancelToken, WaitPolicy};
