//! Fundamental types for the shoal sync agent.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: content digests and millisecond timestamps.

pub mod digest;
pub mod time;

pub use digest::Digest;
pub use time::TimestampMs;
