//! The two sides of the handshake.
//!
//! Each side only touches the data area through a turn guard, and a turn can
//! only be obtained once the header says it is that side's move:
//!
//! - [`Requestor::acquire`] waits for `OUTPUT_READY`, claims the segment
//!   (`INTERMEDIATE`) and returns a [`RequestorTurn`]. The turn ends with
//!   [`RequestorTurn::submit`] (`INPUT_READY`) or [`RequestorTurn::finish`]
//!   (`NO_MORE_INPUT`).
//! - [`Processor::next_request`] waits for `INPUT_READY` or `NO_MORE_INPUT`.
//!   On input it claims the segment and returns a [`ProcessorTurn`], which ends
//!   with [`ProcessorTurn::complete`] (`OUTPUT_READY`).
//!
//! Dropping a turn without ending it keeps control: the header stays
//! `INTERMEDIATE` and the next call hands the same turn back without waiting.

use std::fmt;
use std::time::Duration;

use shm_primitives::{AdvanceError, HEADER_LEN, HandshakeHeader, HandshakeState, Region, Role};

use crate::codec::{self, CodecError};
use crate::image::Image;
use crate::layout::{INPUT_RECORD_OFFSET, OutputShape, SegmentLayout};
use crate::segment::SharedMemory;
use crate::wait::{self, CancelToken, Stopped, WaitPolicy};

/// State shared by both roles: the mapping, its geometry and how to wait.
struct Endpoint<M> {
    /// Keeps the mapping alive for as long as `region` is used.
    _memory: M,
    region: Region,
    layout: SegmentLayout,
    policy: WaitPolicy,
    cancel: Option<CancelToken>,
}

impl<M: SharedMemory> Endpoint<M> {
    fn new(memory: M, layout: SegmentLayout, policy: WaitPolicy) -> Result<Self, HandshakeError> {
        let region = memory.region();
        let required = layout.size.max(SegmentLayout::min_size());
        if region.len() < required {
            return Err(HandshakeError::RegionTooSmall {
                required,
                found: region.len(),
            });
        }
        Ok(Self {
            _memory: memory,
            region,
            layout,
            policy,
            cancel: None,
        })
    }
}

impl<M> Endpoint<M> {
    #[inline]
    fn header(&self) -> &HandshakeHeader {
        // SAFETY: the region is at least `min_size` bytes and offset 0 is
        // only ever accessed as an atomic header.
        unsafe { self.region.get::<HandshakeHeader>(0) }
    }

    fn state(&self) -> Result<HandshakeState, HandshakeError> {
        self.header().load().map_err(HandshakeError::CorruptHeader)
    }

    /// Poll until the header holds one of `wanted`, returning which.
    fn await_any(
        &self,
        role: Role,
        wanted: &[HandshakeState],
    ) -> Result<HandshakeState, HandshakeError> {
        let header = self.header();
        wait::poll(
            &self.policy,
            self.cancel.as_ref(),
            || {
                let state = header.load().map_err(HandshakeError::CorruptHeader)?;
                Ok(wanted.contains(&state).then_some(state))
            },
            |stopped| match stopped {
                Stopped::TimedOut(waited) => HandshakeError::TimedOut {
                    role,
                    awaiting: wanted[0],
                    observed: header.raw(),
                    waited,
                },
                Stopped::Cancelled => HandshakeError::Cancelled { role },
            },
        )
    }

    fn advance(
        &self,
        role: Role,
        from: HandshakeState,
        to: HandshakeState,
    ) -> Result<(), HandshakeError> {
        self.header()
            .advance(role, from, to)
            .map_err(HandshakeError::Advance)?;
        tracing::debug!(%role, %from, %to, "handshake transition");
        Ok(())
    }

    fn data(&self) -> &[u8] {
        // SAFETY: only called through a turn guard, while this side owns the
        // data area.
        unsafe { self.region.bytes(HEADER_LEN, self.layout.data_len()) }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` rules out other local borrows.
        unsafe { self.region.bytes_mut(HEADER_LEN, self.layout.data_len()) }
    }
}

/// The producing side. Attaches to a segment that the processor created.
pub struct Requestor<M> {
    endpoint: Endpoint<M>,
    /// The header is `INTERMEDIATE` and ours.
    holding: bool,
    /// `NO_MORE_INPUT` has been published.
    closed: bool,
}

impl<M: SharedMemory> Requestor<M> {
    /// Wrap an attached mapping. Nothing is written until [`acquire`] observes
    /// `OUTPUT_READY`.
    ///
    /// [`acquire`]: Requestor::acquire
    pub fn new(memory: M, layout: SegmentLayout, policy: WaitPolicy) -> Result<Self, HandshakeError> {
        Ok(Self {
            endpoint: Endpoint::new(memory, layout, policy)?,
            holding: false,
            closed: false,
        })
    }
}

impl<M> Requestor<M> {
    /// Abort pending waits when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.endpoint.cancel = Some(token);
        self
    }

    pub fn layout(&self) -> SegmentLayout {
        self.endpoint.layout
    }

    /// Current header state.
    pub fn state(&self) -> Result<HandshakeState, HandshakeError> {
        self.endpoint.state()
    }

    /// Whether this side currently owns the segment.
    pub fn holds_control(&self) -> bool {
        self.holding
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for our turn and claim the segment.
    pub fn acquire(&mut self) -> Result<RequestorTurn<'_, M>, HandshakeError> {
        if self.closed {
            return Err(HandshakeError::SessionClosed);
        }
        if !self.holding {
            let endpoint = &self.endpoint;
            endpoint.await_any(Role::Requestor, &[HandshakeState::OutputReady])?;
            endpoint.advance(
                Role::Requestor,
                HandshakeState::OutputReady,
                HandshakeState::Intermediate,
            )?;
            self.holding = true;
        }
        Ok(RequestorTurn { requestor: self })
    }
}

/// Exclusive access to the segment on the requestor's behalf.
pub struct RequestorTurn<'a, M> {
    requestor: &'a mut Requestor<M>,
}

impl<M> RequestorTurn<'_, M> {
    /// The data area (everything after the header).
    pub fn data(&self) -> &[u8] {
        self.requestor.endpoint.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.requestor.endpoint.data_mut()
    }

    /// Encode `image` as the input record. Nothing is written if it does not fit.
    pub fn write_input(&mut self, image: &Image) -> Result<usize, CodecError> {
        codec::encode(image, self.data_mut(), INPUT_RECORD_OFFSET)
    }

    /// Decode the pixels the processor left after the input record. Their
    /// dimensions are `shape` applied to the input record's.
    pub fn read_output(&self, shape: OutputShape) -> Result<Image, CodecError> {
        let data = self.data();
        let (rows, columns) = codec::read_dimensions(data, INPUT_RECORD_OFFSET)?;
        let (out_rows, out_columns) = shape.dimensions(rows, columns);
        let offset = self.requestor.endpoint.layout.output_offset(rows, columns);
        codec::decode_pixels(data, offset, out_rows, out_columns)
    }

    /// Hand the segment to the processor (`INPUT_READY`).
    pub fn submit(self) -> Result<(), HandshakeError> {
        self.requestor.endpoint.advance(
            Role::Requestor,
            HandshakeState::Intermediate,
            HandshakeState::InputReady,
        )?;
        self.requestor.holding = false;
        Ok(())
    }

    /// End the session (`NO_MORE_INPUT`). The requestor is closed afterwards.
    pub fn finish(self) -> Result<(), HandshakeError> {
        self.requestor.endpoint.advance(
            Role::Requestor,
            HandshakeState::Intermediate,
            HandshakeState::NoMoreInput,
        )?;
        self.requestor.holding = false;
        self.requestor.closed = true;
        Ok(())
    }
}

/// The consuming side. Creates the header and answers requests.
pub struct Processor<M> {
    endpoint: Endpoint<M>,
    holding: bool,
    finished: bool,
}

impl<M: SharedMemory> Processor<M> {
    /// Take over a freshly created mapping and initialize the header to
    /// `OUTPUT_READY`. The requestor must not be attached yet.
    pub fn create(memory: M, layout: SegmentLayout, policy: WaitPolicy) -> Result<Self, HandshakeError> {
        let endpoint = Endpoint::new(memory, layout, policy)?;
        // SAFETY: no peer is attached yet, so nobody else accesses the header.
        unsafe { endpoint.region.get_mut::<HandshakeHeader>(0) }.init(HandshakeState::OutputReady);
        tracing::debug!(state = %HandshakeState::OutputReady, "initialized handshake header");
        Ok(Self {
            endpoint,
            holding: false,
            finished: false,
        })
    }
}

impl<M> Processor<M> {
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.endpoint.cancel = Some(token);
        self
    }

    pub fn layout(&self) -> SegmentLayout {
        self.endpoint.layout
    }

    pub fn state(&self) -> Result<HandshakeState, HandshakeError> {
        self.endpoint.state()
    }

    /// Whether the requestor has ended the session.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next input. `None` once the requestor sent
    /// `NO_MORE_INPUT`; the header is left as is.
    pub fn next_request(&mut self) -> Result<Option<ProcessorTurn<'_, M>>, HandshakeError> {
        if self.finished {
            return Ok(None);
        }
        if !self.holding {
            let endpoint = &self.endpoint;
            let seen = endpoint.await_any(
                Role::Processor,
                &[HandshakeState::InputReady, HandshakeState::NoMoreInput],
            )?;
            if seen == HandshakeState::NoMoreInput {
                tracing::debug!("requestor ended the session");
                self.finished = true;
                return Ok(None);
            }
            endpoint.advance(
                Role::Processor,
                HandshakeState::InputReady,
                HandshakeState::Intermediate,
            )?;
            self.holding = true;
        }
        Ok(Some(ProcessorTurn { processor: self }))
    }
}

/// Exclusive access to the segment on the processor's behalf.
pub struct ProcessorTurn<'a, M> {
    processor: &'a mut Processor<M>,
}

impl<M> ProcessorTurn<'_, M> {
    pub fn data(&self) -> &[u8] {
        self.processor.endpoint.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.processor.endpoint.data_mut()
    }

    /// Decode the input record.
    pub fn read_input(&self) -> Result<Image, CodecError> {
        codec::decode(self.data(), INPUT_RECORD_OFFSET)
    }

    /// Write the pixels of `image`, and nothing else, right after the input
    /// record. The requestor recovers the dimensions from its own input.
    pub fn write_output(&mut self, image: &Image) -> Result<usize, CodecError> {
        let (rows, columns) = codec::read_dimensions(self.data(), INPUT_RECORD_OFFSET)?;
        let offset = self.processor.endpoint.layout.output_offset(rows, columns);
        codec::encode_pixels(image, self.data_mut(), offset)
    }

    /// Hand the segment back (`OUTPUT_READY`).
    pub fn complete(self) -> Result<(), HandshakeError> {
        self.processor.endpoint.advance(
            Role::Processor,
            HandshakeState::Intermediate,
            HandshakeState::OutputReady,
        )?;
        self.processor.holding = false;
        Ok(())
    }
}

/// Failures of the handshake itself. None of these are recoverable.
#[derive(Debug)]
pub enum HandshakeError {
    /// The mapping is smaller than the layout (or the protocol minimum).
    RegionTooSmall { required: usize, found: usize },
    /// The header holds a byte that is not a known state.
    CorruptHeader(u8),
    /// A transition was illegal or lost a race.
    Advance(AdvanceError),
    /// The peer did not move within the wait policy's timeout.
    TimedOut {
        role: Role,
        awaiting: HandshakeState,
        observed: u8,
        waited: Duration,
    },
    /// The wait was cancelled through a [`CancelToken`].
    Cancelled { role: Role },
    /// `NO_MORE_INPUT` was already sent.
    SessionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegionTooSmall { required, found } => {
                write!(f, "shared region too small: need {required} bytes, got {found}")
            }
            Self::CorruptHeader(raw) => write!(f, "corrupt handshake header byte {raw}"),
            Self::Advance(e) => write!(f, "{e}"),
            Self::TimedOut {
                role,
                awaiting,
                observed,
                waited,
            } => {
                let observed = HandshakeState::try_from(*observed)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|raw| format!("byte {raw}"));
                write!(
                    f,
                    "peer unresponsive: {role} waited {waited:?} for {awaiting}, header is {observed}"
                )
            }
            Self::Cancelled { role } => write!(f, "{role} wait cancelled"),
            Self::SessionClosed => write!(f, "session already ended"),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Advance(e) => Some(e),
            _ => None,
        }
    }
}
