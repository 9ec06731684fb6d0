//! Media library persistence
//!
//! Imports a finished recording into permanent storage. The recorder's
//! output path is reused by every recording, so anything worth keeping has
//! to be copied out before the completion is called.

use crate::recorder::Completion;
use crate::utils::error::{ErrorResponse, RecordingError, RecordingResult};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Permanent storage for finished recordings
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Import the file, returning where it now lives
    async fn import(&self, file: &Path) -> RecordingResult<PathBuf>;
}

/// Library that copies recordings into a directory with timestamped names
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_for(&self, file: &Path) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
        let name = match file.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("recording_{}.{}", stamp, ext),
            None => format!("recording_{}", stamp),
        };
        self.root.join(name)
    }
}

#[async_trait]
impl MediaLibrary for DirectoryLibrary {
    async fn import(&self, file: &Path) -> RecordingResult<PathBuf> {
        if !tokio::fs::try_exists(file).await? {
            return Err(RecordingError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} does not exist", file),
            )));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let target = self.target_for(file);
        tokio::fs::copy(file, &target).await?;
        tracing::debug!("Imported {:?} into {:?}", file, target);
        Ok(target)
    }
}

/// Handle a finish notification: import the file unless finalization
/// failed, then call the completion whatever the outcome.
pub async fn persist_finished(
    library: &dyn MediaLibrary,
    location: &Path,
    error: Option<&ErrorResponse>,
    completion: &Completion,
) -> RecordingResult<PathBuf> {
    let result = match error {
        Some(error) => Err(RecordingError::Finalization(error.message.clone())),
        None => library.import(location).await,
    };

    match &result {
        Ok(saved) => tracing::info!("Recording saved to {:?}", saved),
        Err(e) => tracing::warn!("Recording not saved: {}", e),
    }

    completion.complete();
    result
}
