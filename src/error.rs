//! Error taxonomy for the recording pipeline
//!
//! Every failure is terminal for the session it happens in. The mapping to a
//! user-facing [`RecordingStatus`] lives here so the engine and the HTTP layer
//! agree on it.

use crate::recorder::RecordingStatus;
use crate::transcode::TranscodeError;
use thiserror::Error;

/// Errors that end a recording session
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to acquire capture stream: {0}")]
    Acquisition(String),

    #[error("Capture was ended outside the recorder")]
    ExternalStop,

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

impl RecordingError {
    /// Terminal status reported for this failure
    pub fn status(&self) -> RecordingStatus {
        match self {
            RecordingError::PermissionDenied(_) => RecordingStatus::PermissionDenied,
            RecordingError::Acquisition(_)
            | RecordingError::ExternalStop
            | RecordingError::Recorder(_) => RecordingStatus::Aborted,
            RecordingError::Transcode(_) => RecordingStatus::Error,
        }
    }

    /// Pipeline stage the failure happened in, used as a log field
    pub fn stage(&self) -> &'static str {
        match self {
            RecordingError::PermissionDenied(_) | RecordingError::Acquisition(_) => "acquire",
            RecordingError::ExternalStop => "capture",
            RecordingError::Recorder(_) => "record",
            RecordingError::Transcode(e) => e.stage(),
        }
    }
}
