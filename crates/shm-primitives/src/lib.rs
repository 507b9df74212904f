//! Primitives for a two-party shared memory handshake.
//!
//! This crate provides `no_std`-compatible building blocks for protocols where
//! two processes map the same region and take turns owning it:
//!
//! - [`Region`] / [`HeapRegion`]: raw views of a mapped (or heap) byte region.
//!   Caller manages memory lifetime for `Region`.
//! - [`HandshakeHeader`]: the atomic state byte at the start of the region,
//!   with [`HandshakeState::transition`] as the validated transition table.
//!
//! # Loom Testing
//!
//! Enable the `loom` feature for concurrency verification. The handshake is
//! exercised under loom across all interleavings of both parties.
//!
//! ```text
//! cargo test -p shm-primitives --features loom
//! ```

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod handshake;
pub mod region;
pub mod sync;

pub use handshake::{
    AdvanceError, HEADER_LEN, HandshakeHeader, HandshakeState, Role, TransitionError,
};
#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
