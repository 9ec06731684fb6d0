//! Capture trait definitions
//!
//! The capture device is an external collaborator. The recorder only sees a
//! stream of timestamped buffers tagged audio or video.

use crate::media::{MediaKind, SampleBuffer};
use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Capture quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPreset {
    Vga640x480,
    Hd1280x720,
    Hd1920x1080,
}

impl SessionPreset {
    /// Landscape dimensions delivered by the device for this preset
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SessionPreset::Vga640x480 => (640, 480),
            SessionPreset::Hd1280x720 => (1280, 720),
            SessionPreset::Hd1920x1080 => (1920, 1080),
        }
    }
}

impl Default for SessionPreset {
    fn default() -> Self {
        Self::Hd1280x720
    }
}

/// How the capture source is configured, once, before delivery begins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Output video width in pixels
    pub width: u32,

    /// Output video height in pixels
    pub height: u32,

    pub preset: SessionPreset,

    /// Frame-rate ceiling
    pub max_frame_rate: u32,
}

/// A buffer together with its media-kind tag
#[derive(Debug, Clone)]
pub struct CapturedSample {
    pub buffer: SampleBuffer,
    pub kind: MediaKind,
}

impl CapturedSample {
    pub fn audio(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            kind: MediaKind::Audio,
        }
    }

    pub fn video(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            kind: MediaKind::Video,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind.is_video()
    }
}

/// Latest-frame handle for an on-screen preview.
///
/// Rendering is someone else's job; this only publishes the newest video
/// buffer to whoever holds a receiver.
#[derive(Debug, Clone)]
pub struct PreviewTarget {
    tx: watch::Sender<Option<SampleBuffer>>,
}

impl PreviewTarget {
    pub fn new() -> (Self, watch::Receiver<Option<SampleBuffer>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn present(&self, frame: &SampleBuffer) {
        self.tx.send_replace(Some(frame.clone()));
    }
}

/// A device that delivers audio and video buffers
#[async_trait]
pub trait CaptureSource: Send {
    /// Source identifier (e.g., "synthetic", "camera-0")
    fn id(&self) -> &str;

    /// Configure the device and begin delivering samples
    async fn start(&mut self, config: &CaptureConfig) -> RecordingResult<mpsc::Receiver<CapturedSample>>;

    /// Stop delivery
    async fn stop(&mut self) -> RecordingResult<()>;

    fn is_running(&self) -> bool;
}
