//! Fuzzing harnesses for the shared memory image exchange.
//!
//! The handshake model drives the real atomic header over a heap region,
//! letting the fuzzer pick which side moves next.

pub mod handshake_model;
