//! Two-party turn-taking handshake over a single header byte.
//!
//! ```text
//!        Processor creates segment
//!                  │
//!                  ▼
//!          ┌──────────────┐  Requestor takes   ┌──────────────┐
//!          │ OUTPUT_READY │ ─────────────────▶ │ INTERMEDIATE │ (Requestor owns data)
//!          └──────────────┘                    └──────────────┘
//!                  ▲                               │       │
//!   Processor done │                   submitted   │       │ session over
//!                  │                               ▼       ▼
//!          ┌──────────────┐  Processor takes   ┌─────────────┐  ┌───────────────┐
//!          │ INTERMEDIATE │ ◀───────────────── │ INPUT_READY │  │ NO_MORE_INPUT │
//!          └──────────────┘ (Processor owns)   └─────────────┘  └───────────────┘
//! ```
//!
//! The header doubles as the lock: whichever side moved the header out of the
//! state it was waiting for owns the data area until it publishes the next
//! ready state. `INTERMEDIATE` is always owned by the side that entered it.

use core::fmt;

use crate::sync::{AtomicU8, Ordering};

/// Bytes occupied by the header on the wire.
pub const HEADER_LEN: usize = 1;

/// Handshake states, stored as a single byte at offset 0 of the segment.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandshakeState {
    /// No deliverable pending; owned by whoever entered it.
    Intermediate = 0,
    /// The processor published a result (or is idle); the requestor may take over.
    OutputReady = 1,
    /// The requestor published an input; the processor may take over.
    InputReady = 2,
    /// The requestor ended the session.
    NoMoreInput = 3,
}

impl HandshakeState {
    pub const ALL: [HandshakeState; 4] = [
        HandshakeState::Intermediate,
        HandshakeState::OutputReady,
        HandshakeState::InputReady,
        HandshakeState::NoMoreInput,
    ];

    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Intermediate),
            1 => Some(Self::OutputReady),
            2 => Some(Self::InputReady),
            3 => Some(Self::NoMoreInput),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Validate `self -> next` performed by `role`.
    ///
    /// This is the whole transition table. Note that it cannot tell *which*
    /// side owns `Intermediate`; callers enforce that by only transitioning out
    /// of `Intermediate` while holding a turn they acquired themselves.
    pub const fn transition(self, role: Role, next: Self) -> Result<Self, TransitionError> {
        use HandshakeState::*;

        let legal = matches!(
            (role, self, next),
            (Role::Requestor, OutputReady, Intermediate)
                | (Role::Requestor, Intermediate, InputReady)
                | (Role::Requestor, Intermediate | OutputReady, NoMoreInput)
                | (Role::Processor, InputReady, Intermediate)
                | (Role::Processor, Intermediate, OutputReady)
        );

        if legal {
            Ok(next)
        } else {
            Err(TransitionError {
                role,
                from: self,
                to: next,
            })
        }
    }
}

impl TryFrom<u8> for HandshakeState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(value)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Intermediate => "INTERMEDIATE",
            Self::OutputReady => "OUTPUT_READY",
            Self::InputReady => "INPUT_READY",
            Self::NoMoreInput => "NO_MORE_INPUT",
        })
    }
}

/// The two parties of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Produces inputs and consumes results.
    Requestor,
    /// Owns the segment, consumes inputs and produces results.
    Processor,
}

impl Role {
    /// The state this role polls for before taking control.
    #[inline]
    pub const fn awaits(self) -> HandshakeState {
        match self {
            Role::Requestor => HandshakeState::OutputReady,
            Role::Processor => HandshakeState::InputReady,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Requestor => "requestor",
            Role::Processor => "processor",
        })
    }
}

/// A transition that is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub role: Role,
    pub from: HandshakeState,
    pub to: HandshakeState,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal handshake transition by {}: {} -> {}",
            self.role, self.from, self.to
        )
    }
}

impl core::error::Error for TransitionError {}

/// Errors from [`HandshakeHeader::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceError {
    /// The requested transition is not in the table.
    Illegal(TransitionError),
    /// The header did not hold the expected state.
    Contended {
        expected: HandshakeState,
        observed: u8,
    },
}

impl fmt::Display for AdvanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Illegal(e) => write!(f, "{e}"),
            Self::Contended { expected, observed } => match HandshakeState::from_u8(*observed) {
                Some(state) => write!(f, "header changed under us: expected {expected}, found {state}"),
                None => write!(f, "header changed under us: expected {expected}, found raw byte {observed}"),
            },
        }
    }
}

impl core::error::Error for AdvanceError {}

/// The synchronization header at offset 0 of the segment.
#[repr(C)]
pub struct HandshakeHeader {
    state: AtomicU8,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<HandshakeHeader>() == HEADER_LEN);

impl HandshakeHeader {
    /// Initialize the header. Only the segment creator does this, before the
    /// peer can attach.
    pub fn init(&mut self, state: HandshakeState) {
        // The previous bytes may not be a valid atomic (e.g. under loom), so
        // overwrite without dropping them.
        // SAFETY: `&mut self.state` is valid for writes.
        unsafe { core::ptr::write(&mut self.state, AtomicU8::new(state.as_u8())) };
    }

    /// Raw byte currently in the header (Acquire).
    #[inline]
    pub fn raw(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Current state, or the raw byte if it is not a known state.
    #[inline]
    pub fn load(&self) -> Result<HandshakeState, u8> {
        HandshakeState::try_from(self.raw())
    }

    /// Move the header from `from` to `to` on behalf of `role`.
    ///
    /// Everything written to the data area before this call is visible to a
    /// peer that observes `to`. Illegal transitions trip a debug assertion and
    /// are rejected in release builds.
    pub fn advance(
        &self,
        role: Role,
        from: HandshakeState,
        to: HandshakeState,
    ) -> Result<(), AdvanceError> {
        let checked = from.transition(role, to);
        debug_assert!(checked.is_ok(), "{}", TransitionDisplay(checked));
        checked.map_err(AdvanceError::Illegal)?;

        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|observed| AdvanceError::Contended {
                expected: from,
                observed,
            })
    }
}

struct TransitionDisplay(Result<HandshakeState, TransitionError>);

impl fmt::Display for TransitionDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Ok(state) => write!(f, "-> {state}"),
            Err(e) => write!(f, "{e}"),
        }
    }
}
