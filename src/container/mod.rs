//! Two-track container output
//!
//! Defines the writer interface the recorder drives:
//! - `ContainerWriter` owns the output file and its session lifecycle
//! - `TrackInput` accepts samples for one track and reports back-pressure
//! - `ContainerFactory` builds a fresh writer for each recording attempt

pub mod file;

use crate::media::{AudioFormat, MediaKind, MediaTime, SampleBuffer};
use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use file::{read_container, ContainerContents, FileContainerFactory, FileContainerWriter};

/// Writing lifecycle of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    /// Created, nothing written yet
    Unknown,
    /// Accepting samples
    Writing,
    /// Finalized successfully
    Completed,
    /// Failed while writing or finalizing
    Failed,
}

/// Video track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrackSettings {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

/// Audio track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackSettings {
    pub codec: String,
    pub channels: u32,
    pub sample_rate: f64,
    pub bitrate: u32,
}

/// Everything needed to open a container for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSettings {
    pub video: VideoTrackSettings,
    pub audio: AudioTrackSettings,
}

impl ContainerSettings {
    /// H.264 video at the given size plus AAC audio matching the captured format
    pub fn new(width: u32, height: u32, audio: AudioFormat, audio_bitrate: u32) -> Self {
        Self {
            video: VideoTrackSettings {
                codec: "h264".to_string(),
                width,
                height,
            },
            audio: AudioTrackSettings {
                codec: "aac".to_string(),
                channels: audio.channels,
                sample_rate: audio.sample_rate,
                bitrate: audio_bitrate,
            },
        }
    }
}

/// One track of a container
pub trait TrackInput: Send {
    /// Whether the track can take another sample without blocking
    fn is_ready_for_more_media_data(&self) -> bool;

    /// Append a sample. Callers check readiness first; appending to a
    /// track that is not ready is an error, never a blocking wait.
    fn append(&mut self, sample: SampleBuffer) -> RecordingResult<()>;
}

/// Single-use writer for an audio + video container
#[async_trait]
pub trait ContainerWriter: Send {
    /// Where the container is written
    fn output_location(&self) -> &Path;

    fn status(&self) -> WriterStatus;

    /// Move from `Unknown` to `Writing`
    fn start_writing(&mut self) -> RecordingResult<()>;

    /// Set the output time origin. Samples may be appended only after this.
    fn start_session(&mut self, source_time: MediaTime);

    /// Whether `start_session` has been called
    fn session_started(&self) -> bool;

    /// Input for the given track
    fn input(&mut self, kind: MediaKind) -> &mut dyn TrackInput;

    /// Close both tracks and make the file complete.
    ///
    /// Returns the output location on success.
    async fn finish_writing(&mut self) -> RecordingResult<PathBuf>;
}

/// Builds writers for new recording attempts.
///
/// Any previous output at the writer's location is gone once this returns.
#[async_trait]
pub trait ContainerFactory: Send + Sync {
    async fn create(&self, settings: ContainerSettings) -> RecordingResult<Box<dyn ContainerWriter>>;
}
