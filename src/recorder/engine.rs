//! Writer engine
//!
//! Owns one container writer for one recording attempt and turns capture
//! timestamps into output timestamps:
//! - nothing is written until the first video sample, which becomes time zero
//! - time spent paused is added to an offset and subtracted from every sample
//! - once the output reaches the time limit the container is finalized, once
//!
//! The engine has no locking; it is driven from a single serial context.
//! Finalization runs on a spawned task and reports back over `EngineNotice`.

use super::events::EngineNotice;
use super::state::EngineStatus;
use crate::container::{ContainerWriter, WriterStatus};
use crate::media::{MediaKind, MediaTime, SampleBuffer};
use crate::utils::error::{RecordingError, RecordingResult};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Why a sample was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Engine is in Start, Pause or End
    NotRecording(EngineStatus),
    /// Sample payload was not ready
    DataNotReady,
    /// No video sample has opened the writer session yet
    SessionNotStarted,
}

/// Result of processing one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Discarded(DiscardReason),
    /// Appended to its track
    Appended { elapsed: MediaTime },
    /// Track input was not ready; the sample was dropped for that track
    Dropped { elapsed: MediaTime },
    /// Time limit exceeded; finalization started and the sample was not written
    LimitReached { elapsed: MediaTime },
}

impl ProcessOutcome {
    /// Elapsed recording time to report to the owner, if any
    pub fn elapsed(&self) -> Option<MediaTime> {
        match self {
            ProcessOutcome::Appended { elapsed } | ProcessOutcome::Dropped { elapsed } => {
                Some(*elapsed)
            }
            ProcessOutcome::Discarded(_) | ProcessOutcome::LimitReached { .. } => None,
        }
    }
}

/// State machine and timestamp bookkeeping for one recording
pub struct WriterEngine {
    status: EngineStatus,

    /// Paused time plus the lead-in before the first video sample
    offset_time: MediaTime,

    /// Capture timestamp of the last processed sample
    last_time: Option<MediaTime>,

    recording_time_limit: MediaTime,

    /// Taken when finalization starts
    writer: Option<Box<dyn ContainerWriter>>,

    output_location: PathBuf,
    notices: mpsc::UnboundedSender<EngineNotice>,
    runtime: Handle,
}

impl WriterEngine {
    /// Create an engine around a fresh writer.
    ///
    /// Must be called from within a tokio runtime; finalization is spawned on it.
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        recording_time_limit: MediaTime,
        notices: mpsc::UnboundedSender<EngineNotice>,
    ) -> RecordingResult<Self> {
        let runtime = Handle::try_current().map_err(|e| RecordingError::Runtime(e.to_string()))?;
        if writer.status() != WriterStatus::Unknown {
            return Err(RecordingError::WriterConstruction(format!(
                "writer already used ({:?})",
                writer.status()
            )));
        }
        let output_location = writer.output_location().to_path_buf();

        tracing::info!(
            "Writer engine ready: limit {}, output {:?}",
            recording_time_limit,
            output_location
        );

        Ok(Self {
            status: EngineStatus::Start,
            offset_time: MediaTime::ZERO,
            last_time: None,
            recording_time_limit,
            writer: Some(writer),
            output_location,
            notices,
            runtime,
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn offset_time(&self) -> MediaTime {
        self.offset_time
    }

    pub fn last_time(&self) -> Option<MediaTime> {
        self.last_time
    }

    pub fn recording_time_limit(&self) -> MediaTime {
        self.recording_time_limit
    }

    pub fn output_location(&self) -> &Path {
        &self.output_location
    }

    /// Output duration so far (`last_time - offset_time`)
    pub fn recording_time(&self) -> MediaTime {
        self.last_time
            .map(|last| last - self.offset_time)
            .unwrap_or(MediaTime::ZERO)
    }

    /// Start -> Write, Pause -> Restart; no effect otherwise
    pub fn start(&mut self) {
        let next = self.status.on_start();
        if next != self.status {
            tracing::debug!("Engine {:?} -> {:?}", self.status, next);
            self.status = next;
        }
    }

    /// Write -> Pause; no effect otherwise
    pub fn pause(&mut self) {
        let next = self.status.on_pause();
        if next != self.status {
            tracing::debug!("Engine {:?} -> {:?}", self.status, next);
            self.status = next;
        }
    }

    /// Process one sample. Never blocks and never fails; what happened is
    /// reported in the returned outcome.
    pub fn process(&mut self, buffer: &SampleBuffer, kind: MediaKind) -> ProcessOutcome {
        if self.status.discards_samples() {
            return ProcessOutcome::Discarded(DiscardReason::NotRecording(self.status));
        }

        let timestamp = buffer.presentation_timestamp();

        if self.status == EngineStatus::Restart {
            match self.last_time {
                Some(last) => {
                    let span = timestamp - last;
                    self.offset_time = self.offset_time + span;
                    tracing::debug!(
                        "Resumed after {}; offset now {}",
                        span,
                        self.offset_time
                    );
                }
                None => tracing::debug!("Resumed before any sample was written"),
            }
            self.status = EngineStatus::Write;
        }

        if !buffer.is_data_ready() {
            return ProcessOutcome::Discarded(DiscardReason::DataNotReady);
        }

        if kind.is_video() && self.writer_status() == Some(WriterStatus::Unknown) {
            if let Err(e) = self.begin_session(timestamp) {
                tracing::error!("Could not start writer session: {}", e);
                self.finalize();
                return ProcessOutcome::Discarded(DiscardReason::SessionNotStarted);
            }
        }

        if !self.session_active() {
            return ProcessOutcome::Discarded(DiscardReason::SessionNotStarted);
        }

        let adjusted = buffer.with_presentation_timestamp(timestamp - self.offset_time);
        self.last_time = Some(timestamp);
        let elapsed = timestamp - self.offset_time;

        if elapsed > self.recording_time_limit {
            tracing::info!(
                "Recording limit {} reached at {}",
                self.recording_time_limit,
                elapsed
            );
            self.finalize();
            return ProcessOutcome::LimitReached { elapsed };
        }

        let Some(writer) = self.writer.as_mut() else {
            return ProcessOutcome::Discarded(DiscardReason::NotRecording(self.status));
        };
        let input = writer.input(kind);
        if !input.is_ready_for_more_media_data() {
            tracing::trace!("{} input not ready, dropping sample at {}", kind, timestamp);
            return ProcessOutcome::Dropped { elapsed };
        }
        match input.append(adjusted) {
            Ok(()) => ProcessOutcome::Appended { elapsed },
            Err(e) => {
                tracing::trace!("{} append failed, dropping sample: {}", kind, e);
                ProcessOutcome::Dropped { elapsed }
            }
        }
    }

    fn writer_status(&self) -> Option<WriterStatus> {
        self.writer.as_ref().map(|w| w.status())
    }

    fn session_active(&self) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|w| w.status() == WriterStatus::Writing && w.session_started())
    }

    /// Anchor output time zero at the first video sample
    fn begin_session(&mut self, first_video: MediaTime) -> RecordingResult<()> {
        self.offset_time = first_video;
        let writer = self.writer.as_mut().ok_or_else(|| {
            RecordingError::InvalidWriterState("writer already finalized".to_string())
        })?;
        writer.start_writing()?;
        writer.start_session(MediaTime::ZERO);
        tracing::info!("First video sample at {}; writer session started", first_video);
        Ok(())
    }

    /// Move to End and finish the container on the runtime. The writer is
    /// taken out, so this can only ever run once per engine.
    fn finalize(&mut self) {
        self.status = EngineStatus::End;
        let Some(mut writer) = self.writer.take() else {
            return;
        };

        let location = self.output_location.clone();
        let notices = self.notices.clone();
        self.runtime.spawn(async move {
            let result = writer.finish_writing().await;
            if notices
                .send(EngineNotice::Finished { location, result })
                .is_err()
            {
                tracing::warn!("Recorder went away before finalization completed");
            }
        });
    }
}
