//! Synthetic capture source
//!
//! Produces audio packets and video frames on a wall-clock schedule, with
//! audio starting before the first video frame the way real devices do.
//! Used by the demo binary and by tests that need a realistic stream.

use super::traits::{CaptureConfig, CaptureSource, CapturedSample};
use crate::media::{AudioFormat, FormatDescription, MediaTime, SampleBuffer};
use crate::utils::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shape of the generated stream
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub audio: AudioFormat,

    /// Audio frames per packet
    pub frames_per_packet: u32,

    /// Time between the first audio packet and the first video frame
    pub video_lead_in: Duration,

    /// Host clock value of the first sample
    pub clock_origin: MediaTime,

    /// Delivery queue depth; samples are dropped when it is full
    pub queue_depth: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            audio: AudioFormat {
                channels: 2,
                sample_rate: 44_100.0,
            },
            frames_per_packet: 1024,
            video_lead_in: Duration::from_millis(500),
            clock_origin: MediaTime::ZERO,
            queue_depth: 256,
        }
    }
}

/// Deterministic interleaving of audio and video timestamps
#[derive(Debug, Clone)]
pub struct SampleSchedule {
    audio: AudioFormat,
    frames_per_packet: u32,
    width: u32,
    height: u32,
    clock_origin: MediaTime,
    audio_period_ns: i64,
    video_period_ns: i64,
    next_audio_ns: i64,
    next_video_ns: i64,
    audio_index: u64,
    video_index: u64,
}

impl SampleSchedule {
    pub fn new(synthetic: &SyntheticConfig, capture: &CaptureConfig) -> Self {
        let rate = synthetic.audio.sample_rate.max(1.0);
        let fps = capture.max_frame_rate.max(1) as i64;
        Self {
            audio: synthetic.audio,
            frames_per_packet: synthetic.frames_per_packet.max(1),
            width: capture.width,
            height: capture.height,
            clock_origin: synthetic.clock_origin,
            audio_period_ns: (synthetic.frames_per_packet.max(1) as f64 / rate * 1e9) as i64,
            video_period_ns: 1_000_000_000 / fps,
            next_audio_ns: 0,
            next_video_ns: synthetic.video_lead_in.as_nanos() as i64,
            audio_index: 0,
            video_index: 0,
        }
    }

    /// Offset of the next sample from the start of capture
    pub fn next_offset(&self) -> Duration {
        Duration::from_nanos(self.next_audio_ns.min(self.next_video_ns).max(0) as u64)
    }

    fn audio_sample(&mut self) -> CapturedSample {
        let pts = self.clock_origin + MediaTime::from_nanos(self.next_audio_ns);
        let payload_len = (self.frames_per_packet * self.audio.channels * 2) as usize;
        let buffer = SampleBuffer::new(pts, vec![0u8; payload_len])
            .with_format(FormatDescription::Audio(self.audio))
            .with_duration(MediaTime::from_nanos(self.audio_period_ns));
        self.audio_index += 1;
        self.next_audio_ns += self.audio_period_ns;
        CapturedSample::audio(buffer)
    }

    fn video_sample(&mut self) -> CapturedSample {
        let pts = self.clock_origin + MediaTime::from_nanos(self.next_video_ns);
        let buffer = SampleBuffer::new(pts, self.video_index.to_le_bytes().to_vec())
            .with_format(FormatDescription::Video {
                width: self.width,
                height: self.height,
            })
            .with_duration(MediaTime::from_nanos(self.video_period_ns));
        self.video_index += 1;
        self.next_video_ns += self.video_period_ns;
        CapturedSample::video(buffer)
    }
}

impl Iterator for SampleSchedule {
    type Item = CapturedSample;

    fn next(&mut self) -> Option<CapturedSample> {
        if self.next_audio_ns <= self.next_video_ns {
            Some(self.audio_sample())
        } else {
            Some(self.video_sample())
        }
    }
}

/// Capture source that paces a `SampleSchedule` against the tokio clock
pub struct SyntheticSource {
    id: String,
    config: SyntheticConfig,
    task: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            id: "synthetic".to_string(),
            config,
            task: None,
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait]
impl CaptureSource for SyntheticSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self, config: &CaptureConfig) -> RecordingResult<mpsc::Receiver<CapturedSample>> {
        if self.task.is_some() {
            return Err(RecordingError::Capture(format!("{} is already running", self.id)));
        }
        if self.config.queue_depth == 0 {
            return Err(RecordingError::Configuration(
                "synthetic queue depth must be at least 1".to_string(),
            ));
        }

        tracing::info!(
            "Starting {} capture: {}x{} @ {}fps, {:?}",
            self.id,
            config.width,
            config.height,
            config.max_frame_rate,
            config.preset
        );

        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        let mut schedule = SampleSchedule::new(&self.config, config);
        let started = Instant::now();

        self.task = Some(tokio::spawn(async move {
            let mut dropped = 0u64;
            loop {
                tokio::time::sleep_until(started + schedule.next_offset()).await;
                let Some(sample) = schedule.next() else {
                    break;
                };
                match tx.try_send(sample) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        tracing::trace!("Capture queue full, dropped {} samples so far", dropped);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            tracing::debug!("Synthetic capture loop ended");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!("Stopped {} capture", self.id);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::SessionPreset;
    use crate::media::MediaKind;

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            width: 720,
            height: 1280,
            preset: SessionPreset::Hd1280x720,
            max_frame_rate: 30,
        }
    }

    #[test]
    fn test_schedule_leads_with_audio() {
        let schedule = SampleSchedule::new(&SyntheticConfig::default(), &capture_config());
        let first: Vec<_> = schedule.take(30).collect();

        let first_video = first.iter().position(|s| s.is_video()).unwrap();
        assert!(first_video > 0);
        assert!(first[..first_video].iter().all(|s| s.kind == MediaKind::Audio));
        assert_eq!(
            first[first_video].buffer.presentation_timestamp(),
            MediaTime::from_millis(500)
        );
        assert!(first[0].buffer.audio_format().is_some());
    }

    #[test]
    fn test_schedule_timestamps_non_decreasing() {
        let schedule = SampleSchedule::new(&SyntheticConfig::default(), &capture_config());
        let samples: Vec<_> = schedule.take(500).collect();
        for pair in samples.windows(2) {
            assert!(pair[0].buffer.presentation_timestamp() <= pair[1].buffer.presentation_timestamp());
        }
    }

    #[tokio::test]
    async fn test_source_delivers_samples() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            video_lead_in: Duration::from_millis(0),
            ..SyntheticConfig::default()
        });
        let mut rx = source.start(&capture_config()).await.unwrap();
        assert!(source.is_running());

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.buffer.presentation_timestamp(), MediaTime::ZERO);

        source.stop().await.unwrap();
        assert!(!source.is_running());
    }
}
