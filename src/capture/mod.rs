//! Capture sources
//!
//! The device side of the pipeline: configuration, the source trait, and a
//! synthetic source for demos and tests.

pub mod synthetic;
pub mod traits;

pub use synthetic::{SampleSchedule, SyntheticConfig, SyntheticSource};
pub use traits::{CaptureConfig, CaptureSource, CapturedSample, PreviewTarget, SessionPreset};
