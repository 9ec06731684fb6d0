//! Media primitives
//!
//! Rational timestamps and the sample buffers the capture source delivers.

pub mod sample;
pub mod time;

pub use sample::{AudioFormat, FormatDescription, MediaKind, SampleBuffer, SampleTiming};
pub use time::MediaTime;
