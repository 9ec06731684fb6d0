//! Recording state management
//!
//! Defines the writer state machine states and the recorder configuration.

use crate::capture::{CaptureConfig, SessionPreset};
use crate::media::MediaTime;
use crate::utils::error::{RecordingError, RecordingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// State of one writer engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Constructed, recording not started yet
    Start,
    /// Appending samples
    Write,
    /// Suspended; samples are discarded
    Pause,
    /// Resumed; the next sample absorbs the paused span
    Restart,
    /// Finalized; terminal
    End,
}

impl EngineStatus {
    /// `start()` transition
    pub fn on_start(self) -> Self {
        match self {
            EngineStatus::Start => EngineStatus::Write,
            EngineStatus::Pause => EngineStatus::Restart,
            other => other,
        }
    }

    /// `pause()` transition
    pub fn on_pause(self) -> Self {
        match self {
            EngineStatus::Write => EngineStatus::Pause,
            other => other,
        }
    }

    /// Whether incoming samples are dropped without any processing
    pub fn discards_samples(&self) -> bool {
        matches!(
            self,
            EngineStatus::Start | EngineStatus::Pause | EngineStatus::End
        )
    }
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::Start
    }
}

/// Recorder configuration
///
/// Every field has a default, so a partial JSON file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Maximum recorded duration in seconds
    pub recording_time_limit_secs: u64,

    /// Output video width
    pub video_width: u32,

    /// Output video height
    pub video_height: u32,

    /// Capture quality preset
    pub preset: SessionPreset,

    /// Capture frame-rate ceiling
    pub max_frame_rate: u32,

    /// AAC bitrate for the audio track
    pub audio_bitrate: u32,

    /// Per-track queue depth before the track reports not ready
    pub track_queue_depth: usize,

    /// Fixed output path, overwritten by each recording
    pub output_path: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recording_time_limit_secs: 6,
            video_width: 720,
            video_height: 1280,
            preset: SessionPreset::Hd1280x720,
            max_frame_rate: 30,
            audio_bitrate: 128_000,
            track_queue_depth: 64,
            output_path: std::env::temp_dir().join("temp.itc"),
        }
    }
}

impl RecorderConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> RecordingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded recorder config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> RecordingResult<()> {
        if self.recording_time_limit_secs == 0 {
            return Err(RecordingError::Configuration(
                "recording time limit must be positive".to_string(),
            ));
        }
        if i64::try_from(self.recording_time_limit_secs).is_err() {
            return Err(RecordingError::Configuration(format!(
                "recording time limit of {}s is out of range",
                self.recording_time_limit_secs
            )));
        }
        if self.video_width == 0 || self.video_height == 0 {
            return Err(RecordingError::Configuration(format!(
                "invalid video size {}x{}",
                self.video_width, self.video_height
            )));
        }
        if self.track_queue_depth == 0 {
            return Err(RecordingError::Configuration(
                "track queue depth must be at least 1".to_string(),
            ));
        }
        if self.max_frame_rate == 0 {
            return Err(RecordingError::Configuration(
                "frame-rate ceiling must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Limit as media time. Out-of-range values saturate; `validate` rejects them.
    pub fn recording_time_limit(&self) -> MediaTime {
        MediaTime::from_secs(i64::try_from(self.recording_time_limit_secs).unwrap_or(i64::MAX))
    }

    /// Capture configuration derived from this recorder configuration
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.video_width,
            height: self.video_height,
            preset: self.preset,
            max_frame_rate: self.max_frame_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_start_transitions() {
        assert_eq!(EngineStatus::Start.on_start(), EngineStatus::Write);
        assert_eq!(EngineStatus::Pause.on_start(), EngineStatus::Restart);
        assert_eq!(EngineStatus::Write.on_start(), EngineStatus::Write);
        assert_eq!(EngineStatus::Restart.on_start(), EngineStatus::Restart);
        assert_eq!(EngineStatus::End.on_start(), EngineStatus::End);
    }

    #[test]
    fn test_pause_transitions() {
        assert_eq!(EngineStatus::Write.on_pause(), EngineStatus::Pause);
        assert_eq!(EngineStatus::Pause.on_pause(), EngineStatus::Pause);
        assert_eq!(EngineStatus::Start.on_pause(), EngineStatus::Start);
        assert_eq!(EngineStatus::Restart.on_pause(), EngineStatus::Restart);
        assert_eq!(EngineStatus::End.on_pause(), EngineStatus::End);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        std::fs::write(&path, r#"{ "recordingTimeLimitSecs": 10 }"#).unwrap();

        let config = RecorderConfig::load(&path).unwrap();
        assert_eq!(config.recording_time_limit(), MediaTime::from_secs(10));
        assert_eq!(config.video_width, 720);
        assert_eq!(config.track_queue_depth, 64);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RecorderConfig {
            recording_time_limit_secs: 0,
            ..RecorderConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecordingError::Configuration(_))
        ));
    }

    #[test]
    fn test_oversized_time_limit_rejected() {
        let config = RecorderConfig {
            recording_time_limit_secs: u64::MAX,
            ..RecorderConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecordingError::Configuration(_))
        ));
        assert!(config.recording_time_limit() > MediaTime::ZERO);

        let config = RecorderConfig {
            recording_time_limit_secs: i64::MAX as u64,
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.recording_time_limit(), MediaTime::from_secs(i64::MAX));
    }
}
