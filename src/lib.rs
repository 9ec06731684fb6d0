//! Concat Recorder - pause-aware audio/video recording into one container.
//!
//! Captured audio and video buffers arrive in any order. The recorder waits
//! for the first video frame, removes paused intervals from the timeline,
//! stops at a configured duration and finalizes the output exactly once.

pub mod capture;
pub mod container;
pub mod library;
pub mod media;
pub mod recorder;
pub mod utils;

pub use media::{MediaKind, MediaTime, SampleBuffer};
pub use recorder::{RecorderConfig, RecordingEvent, SampleRouter, WriterEngine};
pub use utils::error::{RecordingError, RecordingResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging from `RUST_LOG`, defaulting to debug output
/// for this crate. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concat_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
