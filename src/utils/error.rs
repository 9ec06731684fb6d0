//! Error types and handling
//!
//! Session-level faults of the recorder. Sample-level faults never become
//! errors; they are reported as `ProcessOutcome` values instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while setting up or finishing a recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Writer construction failed: {0}")]
    WriterConstruction(String),

    #[error("Writer is in an invalid state: {0}")]
    InvalidWriterState(String),

    #[error("Track input not ready: {0}")]
    TrackNotReady(String),

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error payload carried on finish notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecordingError> for ErrorResponse {
    fn from(error: &RecordingError) -> Self {
        let code = match error {
            RecordingError::Configuration(_) => "CONFIGURATION_ERROR",
            RecordingError::Capture(_) => "CAPTURE_ERROR",
            RecordingError::WriterConstruction(_) => "WRITER_CONSTRUCTION_ERROR",
            RecordingError::InvalidWriterState(_) => "WRITER_STATE_ERROR",
            RecordingError::TrackNotReady(_) => "TRACK_NOT_READY",
            RecordingError::Finalization(_) => "FINALIZATION_ERROR",
            RecordingError::Runtime(_) => "RUNTIME_ERROR",
            RecordingError::Io(_) => "IO_ERROR",
            RecordingError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecordingError
pub type RecordingResult<T> = Result<T, RecordingError>;
