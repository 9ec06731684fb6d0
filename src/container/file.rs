//! Interleaved track container on disk
//!
//! Layout:
//! - `ITC1`, u32-LE header length, JSON header (recording id, creation time, track settings)
//! - records: u8 track (0 = video, 1 = audio), i64-LE pts value, i32-LE timescale,
//!   u32-LE payload length, payload
//! - `ITCE`, u32-LE summary length, JSON summary
//!
//! A file without the trailer was never finalized.
//!
//! Each track feeds a bounded queue drained by one writer task, so a track
//! reports "not ready" when its queue is full instead of blocking the caller.

use super::{ContainerFactory, ContainerSettings, ContainerWriter, TrackInput, WriterStatus};
use crate::media::{MediaKind, MediaTime, SampleBuffer};
use crate::utils::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

const HEADER_MAGIC: &[u8; 4] = b"ITC1";
const TRAILER_MAGIC: &[u8; 4] = b"ITCE";

/// File extension used for containers
pub const CONTAINER_EXTENSION: &str = "itc";

/// Header stored at the start of every container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHeader {
    pub recording_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub settings: ContainerSettings,
}

/// Summary written when the container is finalized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub session_start: MediaTime,
    pub video_samples: u64,
    pub audio_samples: u64,
    pub last_video_pts: Option<MediaTime>,
    pub last_audio_pts: Option<MediaTime>,
}

/// A sample read back from a container
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub kind: MediaKind,
    pub presentation: MediaTime,
    pub data: Bytes,
}

/// Parsed container file
#[derive(Debug, Clone)]
pub struct ContainerContents {
    pub header: ContainerHeader,
    pub samples: Vec<StoredSample>,
    /// `None` when the file was never finalized
    pub summary: Option<ContainerSummary>,
}

impl ContainerContents {
    /// Samples of one track in file order
    pub fn track(&self, kind: MediaKind) -> impl Iterator<Item = &StoredSample> {
        self.samples.iter().filter(move |s| s.kind == kind)
    }

    pub fn is_finalized(&self) -> bool {
        self.summary.is_some()
    }
}

#[derive(Debug, Default)]
struct TrackStats {
    samples: u64,
    last_pts: Option<MediaTime>,
}

impl TrackStats {
    fn record(&mut self, pts: MediaTime) {
        self.samples += 1;
        self.last_pts = Some(pts);
    }
}

/// Queue-backed input for one track
pub struct FileTrackInput {
    kind: MediaKind,
    tx: Option<mpsc::Sender<SampleBuffer>>,
    accepting: bool,
}

impl FileTrackInput {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            tx: None,
            accepting: false,
        }
    }

    fn close(&mut self) {
        self.accepting = false;
        self.tx = None;
    }
}

impl TrackInput for FileTrackInput {
    fn is_ready_for_more_media_data(&self) -> bool {
        self.accepting && self.tx.as_ref().is_some_and(|tx| tx.capacity() > 0)
    }

    fn append(&mut self, sample: SampleBuffer) -> RecordingResult<()> {
        if !self.accepting {
            return Err(RecordingError::InvalidWriterState(format!(
                "{} track is not accepting samples",
                self.kind
            )));
        }
        let tx = self.tx.as_ref().ok_or_else(|| {
            RecordingError::InvalidWriterState(format!("{} track is closed", self.kind))
        })?;

        match tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(RecordingError::TrackNotReady(format!("{} queue is full", self.kind)))
            }
            Err(TrySendError::Closed(_)) => Err(RecordingError::InvalidWriterState(format!(
                "{} writer task has stopped",
                self.kind
            ))),
        }
    }
}

type WriteTask = JoinHandle<RecordingResult<(BufWriter<tokio::fs::File>, TrackStats, TrackStats)>>;

/// Container writer backed by a file on disk
pub struct FileContainerWriter {
    path: PathBuf,
    header: ContainerHeader,
    queue_depth: usize,
    file: Option<tokio::fs::File>,
    status: WriterStatus,
    session_start: Option<MediaTime>,
    video: FileTrackInput,
    audio: FileTrackInput,
    task: Option<WriteTask>,
}

impl FileContainerWriter {
    /// Create a writer at `path`, deleting any file already there
    pub async fn create(
        path: &Path,
        settings: ContainerSettings,
        queue_depth: usize,
    ) -> RecordingResult<Self> {
        if queue_depth == 0 {
            return Err(RecordingError::WriterConstruction(
                "track queue depth must be at least 1".to_string(),
            ));
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Removed previous output at {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RecordingError::WriterConstruction(format!(
                    "cannot remove {:?}: {}",
                    path, e
                )))
            }
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::File::create(path).await.map_err(|e| {
            RecordingError::WriterConstruction(format!("cannot create {:?}: {}", path, e))
        })?;

        let header = ContainerHeader {
            recording_id: Uuid::new_v4(),
            created_at: Utc::now(),
            settings,
        };

        tracing::info!(
            "Created container {} at {:?} ({}x{} video, {}ch @ {}Hz audio)",
            header.recording_id,
            path,
            header.settings.video.width,
            header.settings.video.height,
            header.settings.audio.channels,
            header.settings.audio.sample_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            queue_depth,
            file: Some(file),
            status: WriterStatus::Unknown,
            session_start: None,
            video: FileTrackInput::new(MediaKind::Video),
            audio: FileTrackInput::new(MediaKind::Audio),
            task: None,
        })
    }

    pub fn recording_id(&self) -> Uuid {
        self.header.recording_id
    }
}

#[async_trait]
impl ContainerWriter for FileContainerWriter {
    fn output_location(&self) -> &Path {
        &self.path
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn start_writing(&mut self) -> RecordingResult<()> {
        if self.status != WriterStatus::Unknown {
            return Err(RecordingError::InvalidWriterState(format!(
                "cannot start writing from {:?}",
                self.status
            )));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            self.status = WriterStatus::Failed;
            RecordingError::Runtime(e.to_string())
        })?;
        let file = self.file.take().ok_or_else(|| {
            self.status = WriterStatus::Failed;
            RecordingError::InvalidWriterState("output file already consumed".to_string())
        })?;
        let header_json = serde_json::to_vec(&self.header).map_err(|e| {
            self.status = WriterStatus::Failed;
            RecordingError::from(e)
        })?;

        let (video_tx, video_rx) = mpsc::channel(self.queue_depth);
        let (audio_tx, audio_rx) = mpsc::channel(self.queue_depth);
        self.video.tx = Some(video_tx);
        self.audio.tx = Some(audio_tx);

        let out = BufWriter::new(file);
        self.task = Some(runtime.spawn(write_loop(out, header_json, video_rx, audio_rx)));
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, source_time: MediaTime) {
        if self.status != WriterStatus::Writing {
            tracing::warn!("Ignoring session start while writer is {:?}", self.status);
            return;
        }
        self.session_start = Some(source_time);
        self.video.accepting = true;
        self.audio.accepting = true;
    }

    fn session_started(&self) -> bool {
        self.session_start.is_some()
    }

    fn input(&mut self, kind: MediaKind) -> &mut dyn TrackInput {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    async fn finish_writing(&mut self) -> RecordingResult<PathBuf> {
        match self.status {
            WriterStatus::Writing => {}
            WriterStatus::Unknown => {
                self.status = WriterStatus::Failed;
                return Err(RecordingError::Finalization(
                    "writing never started".to_string(),
                ));
            }
            WriterStatus::Completed | WriterStatus::Failed => {
                return Err(RecordingError::InvalidWriterState(
                    "container already finished".to_string(),
                ));
            }
        }

        self.video.close();
        self.audio.close();

        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(Ok((mut out, video, audio))) => {
                    let summary = ContainerSummary {
                        session_start: self.session_start.unwrap_or_default(),
                        video_samples: video.samples,
                        audio_samples: audio.samples,
                        last_video_pts: video.last_pts,
                        last_audio_pts: audio.last_pts,
                    };
                    write_trailer(&mut out, &summary).await.map(|_| summary)
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(RecordingError::Finalization(format!(
                    "writer task aborted: {}",
                    e
                ))),
            },
            None => Err(RecordingError::Finalization(
                "writer task missing".to_string(),
            )),
        };

        match result {
            Ok(summary) => {
                self.status = WriterStatus::Completed;
                tracing::info!(
                    "Finalized {:?}: {} video / {} audio samples",
                    self.path,
                    summary.video_samples,
                    summary.audio_samples
                );
                Ok(self.path.clone())
            }
            Err(e) => {
                self.status = WriterStatus::Failed;
                tracing::error!("Failed to finalize {:?}: {}", self.path, e);
                Err(e)
            }
        }
    }
}

async fn write_loop(
    mut out: BufWriter<tokio::fs::File>,
    header_json: Vec<u8>,
    mut video_rx: mpsc::Receiver<SampleBuffer>,
    mut audio_rx: mpsc::Receiver<SampleBuffer>,
) -> RecordingResult<(BufWriter<tokio::fs::File>, TrackStats, TrackStats)> {
    out.write_all(HEADER_MAGIC).await?;
    out.write_u32_le(header_json.len() as u32).await?;
    out.write_all(&header_json).await?;

    let mut video = TrackStats::default();
    let mut audio = TrackStats::default();
    let mut video_open = true;
    let mut audio_open = true;

    while video_open || audio_open {
        tokio::select! {
            sample = video_rx.recv(), if video_open => match sample {
                Some(sample) => {
                    write_record(&mut out, MediaKind::Video, &sample).await?;
                    video.record(sample.presentation_timestamp());
                }
                None => video_open = false,
            },
            sample = audio_rx.recv(), if audio_open => match sample {
                Some(sample) => {
                    write_record(&mut out, MediaKind::Audio, &sample).await?;
                    audio.record(sample.presentation_timestamp());
                }
                None => audio_open = false,
            },
        }
    }

    Ok((out, video, audio))
}

async fn write_record(
    out: &mut BufWriter<tokio::fs::File>,
    kind: MediaKind,
    sample: &SampleBuffer,
) -> RecordingResult<()> {
    let pts = sample.presentation_timestamp();
    out.write_u8(track_id(kind)).await?;
    out.write_i64_le(pts.value()).await?;
    out.write_i32_le(pts.timescale()).await?;
    out.write_u32_le(sample.data().len() as u32).await?;
    out.write_all(sample.data()).await?;
    Ok(())
}

async fn write_trailer(
    out: &mut BufWriter<tokio::fs::File>,
    summary: &ContainerSummary,
) -> RecordingResult<()> {
    let json = serde_json::to_vec(summary)?;
    out.write_all(TRAILER_MAGIC).await?;
    out.write_u32_le(json.len() as u32).await?;
    out.write_all(&json).await?;
    out.flush().await?;
    out.get_mut().sync_all().await?;
    Ok(())
}

fn track_id(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Video => 0,
        MediaKind::Audio => 1,
    }
}

/// Read a container file back into memory
pub fn read_container(path: &Path) -> RecordingResult<ContainerContents> {
    let bytes = fs::read(path)?;
    let mut reader = ByteReader::new(&bytes);

    if reader.take(4)? != HEADER_MAGIC {
        return Err(invalid_data("missing container header"));
    }
    let header_len = reader.u32()? as usize;
    let header: ContainerHeader = serde_json::from_slice(reader.take(header_len)?)?;

    let mut samples = Vec::new();
    let mut summary = None;

    while !reader.is_empty() {
        if reader.peek(4) == Some(TRAILER_MAGIC.as_slice()) {
            reader.take(4)?;
            let len = reader.u32()? as usize;
            summary = Some(serde_json::from_slice(reader.take(len)?)?);
            break;
        }

        let kind = match reader.u8()? {
            0 => MediaKind::Video,
            1 => MediaKind::Audio,
            other => return Err(invalid_data(&format!("unknown track id {}", other))),
        };
        let value = reader.i64()?;
        let timescale = reader.i32()?;
        let presentation = MediaTime::checked(value, timescale)
            .ok_or_else(|| invalid_data(&format!("invalid timescale {}", timescale)))?;
        let len = reader.u32()? as usize;
        let data = Bytes::copy_from_slice(reader.take(len)?);
        samples.push(StoredSample {
            kind,
            presentation,
            data,
        });
    }

    Ok(ContainerContents {
        header,
        samples,
        summary,
    })
}

fn invalid_data(message: &str) -> RecordingError {
    RecordingError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_string(),
    ))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.bytes.get(self.pos..self.pos + n)
    }

    fn take(&mut self, n: usize) -> RecordingResult<&'a [u8]> {
        let slice = self.peek(n).ok_or_else(|| {
            RecordingError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated container",
            ))
        })?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> RecordingResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> RecordingResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn i32(&mut self) -> RecordingResult<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn i64(&mut self) -> RecordingResult<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }
}

/// Creates file writers at a fixed path, replacing the previous recording
pub struct FileContainerFactory {
    path: PathBuf,
    queue_depth: usize,
}

impl FileContainerFactory {
    pub fn new(path: impl Into<PathBuf>, queue_depth: usize) -> Self {
        Self {
            path: path.into(),
            queue_depth,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContainerFactory for FileContainerFactory {
    async fn create(&self, settings: ContainerSettings) -> RecordingResult<Box<dyn ContainerWriter>> {
        let writer = FileContainerWriter::create(&self.path, settings, self.queue_depth).await?;
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AudioFormat;
    use tempfile::tempdir;

    fn settings() -> ContainerSettings {
        ContainerSettings::new(
            720,
            1280,
            AudioFormat {
                channels: 2,
                sample_rate: 44_100.0,
            },
            128_000,
        )
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.itc");
        let mut writer = FileContainerWriter::create(&path, settings(), 8).await.unwrap();

        writer.start_writing().unwrap();
        writer.start_session(MediaTime::ZERO);
        writer
            .input(MediaKind::Video)
            .append(SampleBuffer::new(MediaTime::ZERO, vec![1u8, 2, 3]))
            .unwrap();
        writer
            .input(MediaKind::Audio)
            .append(SampleBuffer::new(MediaTime::from_millis(50), vec![9u8]))
            .unwrap();

        let location = writer.finish_writing().await.unwrap();
        assert_eq!(location, path);
        assert_eq!(writer.status(), WriterStatus::Completed);

        let contents = read_container(&path).unwrap();
        assert!(contents.is_finalized());
        assert_eq!(contents.header.settings.audio.channels, 2);
        assert_eq!(contents.track(MediaKind::Video).count(), 1);
        let audio: Vec<_> = contents.track(MediaKind::Audio).collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].presentation, MediaTime::from_millis(50));
        assert_eq!(audio[0].data.as_ref(), &[9u8]);

        let summary = contents.summary.unwrap();
        assert_eq!(summary.video_samples, 1);
        assert_eq!(summary.audio_samples, 1);
    }

    #[tokio::test]
    async fn test_append_before_session_rejected() {
        let dir = tempdir().unwrap();
        let mut writer =
            FileContainerWriter::create(&dir.path().join("early.itc"), settings(), 4).await.unwrap();
        writer.start_writing().unwrap();

        let input = writer.input(MediaKind::Video);
        assert!(!input.is_ready_for_more_media_data());
        let err = input
            .append(SampleBuffer::new(MediaTime::ZERO, Vec::<u8>::new()))
            .unwrap_err();
        assert!(matches!(err, RecordingError::InvalidWriterState(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_reports_not_ready() {
        let dir = tempdir().unwrap();
        let mut writer =
            FileContainerWriter::create(&dir.path().join("full.itc"), settings(), 1).await.unwrap();
        writer.start_writing().unwrap();
        writer.start_session(MediaTime::ZERO);

        // The writer task cannot run until this test yields, so the queue stays full.
        let input = writer.input(MediaKind::Audio);
        input
            .append(SampleBuffer::new(MediaTime::ZERO, vec![0u8]))
            .unwrap();
        assert!(!input.is_ready_for_more_media_data());
        let err = input
            .append(SampleBuffer::new(MediaTime::from_millis(1), vec![0u8]))
            .unwrap_err();
        assert!(matches!(err, RecordingError::TrackNotReady(_)));
    }

    #[tokio::test]
    async fn test_create_replaces_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("temp.itc");
        fs::write(&path, b"stale").unwrap();

        let _writer = FileContainerWriter::create(&path, settings(), 4).await.unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_create_makes_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.itc");

        let writer = FileContainerWriter::create(&path, settings(), 4).await.unwrap();
        assert_eq!(writer.output_location(), path);
        assert!(path.exists());
    }

    #[test]
    fn test_read_rejects_invalid_timescale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.itc");
        let header = serde_json::to_vec(&ContainerHeader {
            recording_id: Uuid::new_v4(),
            created_at: Utc::now(),
            settings: settings(),
        })
        .unwrap();

        let mut bytes = HEADER_MAGIC.to_vec();
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.push(0);
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let err = read_container(&path).unwrap_err();
        assert!(matches!(err, RecordingError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn test_finish_without_start_fails() {
        let dir = tempdir().unwrap();
        let mut writer =
            FileContainerWriter::create(&dir.path().join("idle.itc"), settings(), 4).await.unwrap();
        let err = writer.finish_writing().await.unwrap_err();
        assert!(matches!(err, RecordingError::Finalization(_)));
        assert_eq!(writer.status(), WriterStatus::Failed);
    }

    #[tokio::test]
    async fn test_unfinalized_file_has_no_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.itc");
        {
            let mut writer = FileContainerWriter::create(&path, settings(), 4).await.unwrap();
            writer.start_writing().unwrap();
            writer.start_session(MediaTime::ZERO);
            writer
                .input(MediaKind::Video)
                .append(SampleBuffer::new(MediaTime::ZERO, vec![7u8]))
                .unwrap();
            let task = writer.task.take().unwrap();
            drop(writer);
            let (mut out, _, _) = task.await.unwrap().unwrap();
            out.flush().await.unwrap();
        }

        let contents = read_container(&path).unwrap();
        assert!(!contents.is_finalized());
        assert_eq!(contents.samples.len(), 1);
    }
}
