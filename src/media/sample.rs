//! Timestamped sample buffers
//!
//! A `SampleBuffer` is immutable once captured. Retiming produces a new
//! buffer that shares the payload with the original.

use super::time::MediaTime;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind of a sample or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_is_video(is_video: bool) -> Self {
        if is_video {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Stream description of captured audio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Channels per frame
    pub channels: u32,

    /// Sample rate in Hz
    pub sample_rate: f64,
}

/// Format description attached to a sample buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatDescription {
    Audio(AudioFormat),
    Video { width: u32, height: u32 },
}

impl FormatDescription {
    /// The audio stream description, if this describes audio
    pub fn audio(&self) -> Option<AudioFormat> {
        match self {
            FormatDescription::Audio(format) => Some(*format),
            FormatDescription::Video { .. } => None,
        }
    }
}

/// Timing of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTiming {
    pub presentation: MediaTime,
    pub duration: Option<MediaTime>,
    pub decode: Option<MediaTime>,
}

/// One unit of captured media
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    timing: SampleTiming,
    format: Option<FormatDescription>,
    data: Bytes,
    data_ready: bool,
}

impl SampleBuffer {
    /// Create a ready sample with the given presentation timestamp and payload
    pub fn new(presentation: MediaTime, data: impl Into<Bytes>) -> Self {
        Self {
            timing: SampleTiming {
                presentation,
                duration: None,
                decode: None,
            },
            format: None,
            data: data.into(),
            data_ready: true,
        }
    }

    pub fn with_format(mut self, format: FormatDescription) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_duration(mut self, duration: MediaTime) -> Self {
        self.timing.duration = Some(duration);
        self
    }

    /// Mark whether the payload has been filled in yet
    pub fn with_data_ready(mut self, ready: bool) -> Self {
        self.data_ready = ready;
        self
    }

    pub fn presentation_timestamp(&self) -> MediaTime {
        self.timing.presentation
    }

    pub fn timing(&self) -> &SampleTiming {
        &self.timing
    }

    pub fn format(&self) -> Option<&FormatDescription> {
        self.format.as_ref()
    }

    /// Audio stream description, when this buffer carries one
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.format.and_then(|f| f.audio())
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_data_ready(&self) -> bool {
        self.data_ready
    }

    /// Copy of this buffer with a new presentation timestamp.
    ///
    /// Payload, format, duration and readiness are carried over unchanged;
    /// a decode timestamp is shifted by the same amount as the presentation.
    pub fn with_presentation_timestamp(&self, presentation: MediaTime) -> SampleBuffer {
        let shift = presentation - self.timing.presentation;
        SampleBuffer {
            timing: SampleTiming {
                presentation,
                duration: self.timing.duration,
                decode: self.timing.decode.map(|d| d + shift),
            },
            format: self.format,
            data: self.data.clone(),
            data_ready: self.data_ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retime_preserves_payload() {
        let original = SampleBuffer::new(MediaTime::from_millis(550), vec![1u8, 2, 3])
            .with_duration(MediaTime::from_millis(23));
        let copy = original.with_presentation_timestamp(MediaTime::from_millis(50));

        assert_eq!(copy.presentation_timestamp(), MediaTime::from_millis(50));
        assert_eq!(copy.data(), original.data());
        assert_eq!(copy.timing().duration, Some(MediaTime::from_millis(23)));
        assert_eq!(original.presentation_timestamp(), MediaTime::from_millis(550));
    }

    #[test]
    fn test_audio_format_lookup() {
        let format = AudioFormat {
            channels: 2,
            sample_rate: 44_100.0,
        };
        let audio = SampleBuffer::new(MediaTime::ZERO, Bytes::new())
            .with_format(FormatDescription::Audio(format));
        assert_eq!(audio.audio_format(), Some(format));

        let video = SampleBuffer::new(MediaTime::ZERO, Bytes::new()).with_format(
            FormatDescription::Video {
                width: 720,
                height: 1280,
            },
        );
        assert_eq!(video.audio_format(), None);
    }

    #[test]
    fn test_media_kind_tag() {
        assert_eq!(MediaKind::from_is_video(true), MediaKind::Video);
        assert_eq!(MediaKind::from_is_video(false).to_string(), "audio");
    }
}
