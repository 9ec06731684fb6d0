//! Sample router
//!
//! Receives every captured buffer, builds the writer engine once the first
//! audio buffer reveals the audio format, and forwards traffic to it. All
//! engine access happens on the router's serial context; finalization
//! results and owner releases come back as `EngineNotice`s on that context.

use super::engine::WriterEngine;
use super::events::{Completion, EngineNotice, RecordingEvent};
use super::state::{EngineStatus, RecorderConfig};
use crate::capture::{CaptureSource, CapturedSample, PreviewTarget};
use crate::container::{ContainerFactory, ContainerSettings, FileContainerFactory};
use crate::media::{AudioFormat, MediaKind, MediaTime, SampleBuffer};
use crate::utils::error::{ErrorResponse, RecordingError, RecordingResult};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Whether a writer engine exists for the current recording
pub enum EngineSlot {
    /// Waiting for the first audio buffer
    Uninitialized,
    Active(WriterEngine),
}

/// Control messages from owners on other tasks
#[derive(Debug)]
pub enum RouterCommand {
    /// Start or resume; replies whether an engine existed
    Start(oneshot::Sender<bool>),
    Pause,
}

/// Cloneable control handle for a running router
#[derive(Debug, Clone)]
pub struct RouterHandle {
    commands: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Start or resume recording. False if no engine exists yet.
    pub async fn start(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(RouterCommand::Start(tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn pause(&self) {
        let _ = self.commands.send(RouterCommand::Pause).await;
    }
}

enum RouterInput {
    Notice(EngineNotice),
    Command(RouterCommand),
    Sample(Option<CapturedSample>),
}

/// Routes captured samples into a lazily constructed writer engine
pub struct SampleRouter {
    config: RecorderConfig,
    recording_time_limit: MediaTime,
    factory: Box<dyn ContainerFactory>,
    engine: EngineSlot,
    source: Option<Box<dyn CaptureSource>>,
    samples: Option<mpsc::Receiver<CapturedSample>>,
    preview: Option<PreviewTarget>,
    notices_tx: mpsc::UnboundedSender<EngineNotice>,
    notices_rx: mpsc::UnboundedReceiver<EngineNotice>,
    commands_tx: mpsc::Sender<RouterCommand>,
    commands_rx: mpsc::Receiver<RouterCommand>,
    events_tx: broadcast::Sender<RecordingEvent>,
}

impl SampleRouter {
    /// Create a router that builds writers with `factory`
    pub fn new(config: RecorderConfig, factory: Box<dyn ContainerFactory>) -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, _) = broadcast::channel(256);
        Self {
            recording_time_limit: config.recording_time_limit(),
            config,
            factory,
            engine: EngineSlot::Uninitialized,
            source: None,
            samples: None,
            preview: None,
            notices_tx,
            notices_rx,
            commands_tx,
            commands_rx,
            events_tx,
        }
    }

    /// Create a router writing to the fixed output path from `config`
    pub fn with_file_output(config: RecorderConfig) -> Self {
        let factory = FileContainerFactory::new(config.output_path.clone(), config.track_queue_depth);
        Self::new(config, Box::new(factory))
    }

    /// Subscribe to time and finish events.
    ///
    /// A live receiver keeps every event it has not read yet, including the
    /// `Completion` inside `Finished`, so the engine is only released by
    /// dropping completions once each subscriber has received the event or
    /// been dropped. Subscribers must keep reading.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events_tx.subscribe()
    }

    /// Control handle usable from other tasks while `run` is active
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn recording_time_limit(&self) -> MediaTime {
        self.recording_time_limit
    }

    /// Status of the current engine, `None` while uninitialized
    pub fn engine_status(&self) -> Option<EngineStatus> {
        match &self.engine {
            EngineSlot::Uninitialized => None,
            EngineSlot::Active(engine) => Some(engine.status()),
        }
    }

    /// Configure and start the capture source, remembering the time limit.
    /// Samples are consumed by `run`.
    pub async fn configure_source(
        &mut self,
        mut source: Box<dyn CaptureSource>,
        preview: Option<PreviewTarget>,
        recording_time_limit: MediaTime,
    ) -> RecordingResult<()> {
        if recording_time_limit <= MediaTime::ZERO {
            return Err(RecordingError::Configuration(
                "recording time limit must be positive".to_string(),
            ));
        }
        let capture_config = self.config.capture_config();
        let samples = source.start(&capture_config).await?;

        tracing::info!(
            "Configured capture source '{}' with limit {}",
            source.id(),
            recording_time_limit
        );

        self.recording_time_limit = recording_time_limit;
        self.preview = preview;
        self.samples = Some(samples);
        self.source = Some(source);
        Ok(())
    }

    /// Handle one captured buffer
    pub async fn on_sample_buffer(&mut self, buffer: SampleBuffer, is_video: bool) {
        self.drain_notices();

        if is_video {
            if let Some(preview) = &self.preview {
                preview.present(&buffer);
            }
        }

        if matches!(self.engine, EngineSlot::Uninitialized) && !is_video {
            match buffer.audio_format() {
                Some(format) => match self.construct_engine(format).await {
                    Ok(engine) => self.engine = EngineSlot::Active(engine),
                    Err(e) => tracing::warn!("Could not construct writer engine: {}", e),
                },
                None => tracing::trace!("Audio sample without a format description"),
            }
        }

        let outcome = match &mut self.engine {
            EngineSlot::Uninitialized => {
                tracing::trace!("No engine yet, dropping sample");
                return;
            }
            EngineSlot::Active(engine) => engine.process(&buffer, MediaKind::from_is_video(is_video)),
        };

        if let Some(elapsed) = outcome.elapsed() {
            let progress = elapsed.fraction_of(self.recording_time_limit);
            let _ = self
                .events_tx
                .send(RecordingEvent::TimeChanged { elapsed, progress });
        }
    }

    /// Start or resume. False if no engine exists yet.
    pub fn start(&mut self) -> bool {
        self.drain_notices();
        match &mut self.engine {
            EngineSlot::Uninitialized => false,
            EngineSlot::Active(engine) => {
                engine.start();
                true
            }
        }
    }

    pub fn pause(&mut self) {
        self.drain_notices();
        match &mut self.engine {
            EngineSlot::Uninitialized => {}
            EngineSlot::Active(engine) => engine.pause(),
        }
    }

    /// Wait for the next engine notice and handle it along with any others
    /// already queued. For owners that drive the router without `run`.
    pub async fn pump_notices(&mut self) {
        if let Some(notice) = self.notices_rx.recv().await {
            self.handle_notice(notice);
        }
        self.drain_notices();
    }

    /// Serial loop: samples, owner commands and engine notices, until the
    /// capture stream ends. Stops the capture source on exit.
    pub async fn run(&mut self) -> RecordingResult<()> {
        let mut samples = self.samples.take().ok_or_else(|| {
            RecordingError::Configuration("capture source not configured".to_string())
        })?;

        loop {
            let input = tokio::select! {
                biased;
                Some(notice) = self.notices_rx.recv() => RouterInput::Notice(notice),
                Some(command) = self.commands_rx.recv() => RouterInput::Command(command),
                sample = samples.recv() => RouterInput::Sample(sample),
            };

            match input {
                RouterInput::Notice(notice) => self.handle_notice(notice),
                RouterInput::Command(RouterCommand::Start(reply)) => {
                    let _ = reply.send(self.start());
                }
                RouterInput::Command(RouterCommand::Pause) => self.pause(),
                RouterInput::Sample(Some(sample)) => {
                    let is_video = sample.is_video();
                    self.on_sample_buffer(sample.buffer, is_video).await;
                }
                RouterInput::Sample(None) => {
                    tracing::info!("Capture stream ended");
                    break;
                }
            }
        }

        if let Some(source) = self.source.as_mut() {
            source.stop().await?;
        }
        Ok(())
    }

    async fn construct_engine(&mut self, format: AudioFormat) -> RecordingResult<WriterEngine> {
        tracing::info!(
            "First audio sample: {} channels @ {} Hz",
            format.channels,
            format.sample_rate
        );
        let settings = ContainerSettings::new(
            self.config.video_width,
            self.config.video_height,
            format,
            self.config.audio_bitrate,
        );
        let writer = self.factory.create(settings).await?;
        WriterEngine::new(writer, self.recording_time_limit, self.notices_tx.clone())
    }

    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notices_rx.try_recv() {
            self.handle_notice(notice);
        }
    }

    fn handle_notice(&mut self, notice: EngineNotice) {
        match notice {
            EngineNotice::Finished { location, result } => {
                let error = match &result {
                    Ok(_) => {
                        tracing::info!("Recording finished: {:?}", location);
                        None
                    }
                    Err(e) => {
                        tracing::error!("Recording finished with error: {}", e);
                        Some(ErrorResponse::from(e))
                    }
                };

                let completion = Completion::new(self.notices_tx.clone());
                let event = RecordingEvent::Finished {
                    location,
                    error,
                    completion: completion.clone(),
                };
                if self.events_tx.send(event).is_err() {
                    tracing::warn!("No owner is listening for the finished recording; releasing engine");
                    completion.complete();
                }
            }
            EngineNotice::Released => {
                if let EngineSlot::Active(engine) = &self.engine {
                    tracing::info!("Releasing writer engine for {:?}", engine.output_location());
                }
                self.engine = EngineSlot::Uninitialized;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticConfig, SyntheticSource};
    use crate::container::read_container;
    use crate::media::FormatDescription;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::broadcast::error::RecvError;

    fn config(dir: &std::path::Path, limit_secs: u64) -> RecorderConfig {
        RecorderConfig {
            recording_time_limit_secs: limit_secs,
            output_path: dir.join("temp.itc"),
            ..RecorderConfig::default()
        }
    }

    fn audio(secs: f64) -> SampleBuffer {
        SampleBuffer::new(MediaTime::from_secs_f64(secs), vec![1u8; 8]).with_format(
            FormatDescription::Audio(AudioFormat {
                channels: 2,
                sample_rate: 44_100.0,
            }),
        )
    }

    fn video(secs: f64) -> SampleBuffer {
        SampleBuffer::new(MediaTime::from_secs_f64(secs), vec![2u8; 16])
    }

    async fn next_finished(
        events: &mut broadcast::Receiver<RecordingEvent>,
    ) -> (std::path::PathBuf, Option<ErrorResponse>, Completion) {
        loop {
            match events.recv().await {
                Ok(RecordingEvent::Finished {
                    location,
                    error,
                    completion,
                }) => return (location, error, completion),
                Ok(RecordingEvent::TimeChanged { .. }) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_engine_waits_for_audio_format() {
        let dir = tempdir().unwrap();
        let mut router = SampleRouter::with_file_output(config(dir.path(), 6));

        assert!(!router.start());
        router.on_sample_buffer(video(0.1), true).await;
        assert!(router.engine_status().is_none());

        // Audio without a format description cannot build the engine.
        router.on_sample_buffer(SampleBuffer::new(MediaTime::ZERO, vec![0u8]), false).await;
        assert!(router.engine_status().is_none());

        router.on_sample_buffer(audio(0.2), false).await;
        assert_eq!(router.engine_status(), Some(EngineStatus::Start));
        assert!(router.start());
        assert_eq!(router.engine_status(), Some(EngineStatus::Write));
    }

    #[tokio::test]
    async fn test_worked_example_end_to_end() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 6);
        let output = cfg.output_path.clone();
        let mut router = SampleRouter::with_file_output(cfg);
        let mut events = router.subscribe();

        router.on_sample_buffer(audio(0.40), false).await;
        assert!(router.start());
        router.on_sample_buffer(video(0.50), true).await;
        router.on_sample_buffer(audio(0.55), false).await;
        router.on_sample_buffer(video(1.00), true).await;
        router.pause();
        router.on_sample_buffer(video(2.00), true).await;
        assert!(router.start());

        let mut t = 3.00;
        while router.engine_status() != Some(EngineStatus::End) {
            router.on_sample_buffer(video(t), true).await;
            router.on_sample_buffer(audio(t + 0.01), false).await;
            t += 0.1;
            // Writer task drains the bounded queues between frames.
            tokio::task::yield_now().await;
        }
        // Extra samples after the cutoff are ignored.
        router.on_sample_buffer(video(t), true).await;

        router.pump_notices().await;
        let (location, error, completion) = next_finished(&mut events).await;
        assert_eq!(location, output);
        assert!(error.is_none());

        let contents = read_container(&location).unwrap();
        assert!(contents.is_finalized());
        let video_times: Vec<f64> = contents
            .track(MediaKind::Video)
            .map(|s| s.presentation.as_secs_f64())
            .collect();
        assert!(video_times[0].abs() < 1e-6);
        assert!((video_times[1] - 0.5).abs() < 1e-6);
        assert!((video_times[2] - 0.5).abs() < 1e-6);
        assert!(video_times.iter().all(|t| *t <= 6.0 + 1e-6));
        let first_audio = contents.track(MediaKind::Audio).next().unwrap();
        assert!((first_audio.presentation.as_secs_f64() - 0.05).abs() < 1e-6);

        // Engine is held until the owner releases the file.
        assert_eq!(router.engine_status(), Some(EngineStatus::End));
        assert!(completion.complete());
        router.pump_notices().await;
        assert!(router.engine_status().is_none());

        // The next audio sample starts a fresh recording at the same path.
        router.on_sample_buffer(audio(20.0), false).await;
        assert_eq!(router.engine_status(), Some(EngineStatus::Start));
        assert!(!read_container(&output).map(|c| c.is_finalized()).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_time_changed_reports_progress() {
        let dir = tempdir().unwrap();
        let mut router = SampleRouter::with_file_output(config(dir.path(), 4));
        let mut events = router.subscribe();

        router.on_sample_buffer(audio(0.0), false).await;
        router.start();
        router.on_sample_buffer(video(1.0), true).await;
        router.on_sample_buffer(video(2.0), true).await;

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::TimeChanged { elapsed, progress } = event {
                last = Some((elapsed, progress));
            }
        }
        let (elapsed, progress) = last.unwrap();
        assert_eq!(elapsed, MediaTime::from_secs(1));
        assert!((progress - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unobserved_finish_releases_engine() {
        let dir = tempdir().unwrap();
        let mut router = SampleRouter::with_file_output(config(dir.path(), 1));

        router.on_sample_buffer(audio(0.0), false).await;
        router.start();
        router.on_sample_buffer(video(0.0), true).await;
        router.on_sample_buffer(video(1.5), true).await;
        assert_eq!(router.engine_status(), Some(EngineStatus::End));

        // Finished has no listener, so the release is queued and drained in the same pump.
        router.pump_notices().await;
        assert!(router.engine_status().is_none());
    }

    #[tokio::test]
    async fn test_dropped_completions_release_engine() {
        let dir = tempdir().unwrap();
        let mut router = SampleRouter::with_file_output(config(dir.path(), 1));
        let mut events = router.subscribe();
        let idle = router.subscribe();

        router.on_sample_buffer(audio(0.0), false).await;
        router.start();
        router.on_sample_buffer(video(0.0), true).await;
        router.on_sample_buffer(video(1.5), true).await;
        router.pump_notices().await;

        let (_, error, completion) = next_finished(&mut events).await;
        assert!(error.is_none());
        drop(completion);

        // The idle subscriber still holds the unread event.
        router.drain_notices();
        assert_eq!(router.engine_status(), Some(EngineStatus::End));

        drop(idle);
        router.pump_notices().await;
        assert!(router.engine_status().is_none());
    }

    #[tokio::test]
    async fn test_run_with_synthetic_source() {
        let dir = tempdir().unwrap();
        let cfg = RecorderConfig {
            max_frame_rate: 15,
            ..config(dir.path(), 1)
        };
        let mut router = SampleRouter::with_file_output(cfg);
        let mut events = router.subscribe();
        let handle = router.handle();

        let (preview, mut preview_rx) = PreviewTarget::new();
        let source = SyntheticSource::new(SyntheticConfig {
            video_lead_in: Duration::from_millis(100),
            ..SyntheticConfig::default()
        });
        router
            .configure_source(Box::new(source), Some(preview), MediaTime::from_secs(1))
            .await
            .unwrap();

        let task = tokio::spawn(async move {
            let _ = router.run().await;
        });

        let started = tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.start().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(started.is_ok());

        let (location, error, completion) =
            tokio::time::timeout(Duration::from_secs(10), next_finished(&mut events))
                .await
                .unwrap();
        assert!(error.is_none());
        completion.complete();

        let contents = read_container(&location).unwrap();
        assert!(contents.is_finalized());
        let first_video = contents.track(MediaKind::Video).next().unwrap();
        assert!(first_video.presentation.is_zero());
        assert!(contents.track(MediaKind::Audio).count() > 0);

        assert!(preview_rx.borrow_and_update().is_some());
        task.abort();
    }
}
