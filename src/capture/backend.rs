use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Life-cycle state of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// A single live track of a capture stream
#[async_trait]
pub trait MediaTrack: Send + Sync {
    /// Track identifier for logging
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop the track. Stopping an ended track is a no-op.
    fn stop(&self);

    fn state(&self) -> TrackState;

    /// Negotiated frame rate, when the source reports one
    fn frame_rate(&self) -> Option<u32> {
        None
    }

    /// Resolves once the track has ended, for whatever reason
    async fn ended(&self);
}

/// A granted capture stream: a set of live tracks
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// First video track, the one whose end means the user stopped sharing
    pub fn primary_video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Constraints passed when requesting a capture stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub frame_rate_ideal: u32,
    pub frame_rate_max: u32,
    /// Hint to prefer capturing the surface the widget is rendered on
    pub prefer_current_tab: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            frame_rate_ideal: 60,
            frame_rate_max: 60,
            prefer_current_tab: true,
        }
    }
}

/// Structured classification of an acquisition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireErrorKind {
    /// The user or the platform refused capture permission
    NotAllowed,
    /// No capturable surface was found
    NotFound,
    /// The surface exists but could not be read
    NotReadable,
    /// The request was aborted before a stream was granted
    Aborted,
    /// The backend could not classify the failure
    Other,
}

/// Failure returned by [`CaptureBackend::acquire`]
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct AcquireError {
    pub kind: AcquireErrorKind,
    pub message: String,
}

impl AcquireError {
    pub fn new(kind: AcquireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Activity state of a [`MediaRecorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Inactive,
    Recording,
}

/// Options for creating a recorder over a stream
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub mime_type: String,
    pub video_bits_per_second: u64,
}

/// Events a recorder delivers while running
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A recorded fragment. May be empty.
    DataAvailable(Vec<u8>),
    /// Recording ended. Delivered after the last `DataAvailable`.
    Stopped {
        /// Mimetype negotiated by the recorder
        mime_type: String,
        /// The source went away rather than `stop` being requested
        source_ended: bool,
    },
}

/// Chunked recorder over a capture stream
pub trait MediaRecorder: Send {
    /// Begin recording, delivering events into `events` until stopped
    fn start(&mut self, events: mpsc::UnboundedSender<MediaEvent>) -> Result<(), String>;

    /// Request the recorder to stop. A `Stopped` event follows asynchronously.
    fn stop(&mut self);

    fn state(&self) -> RecorderState;

    fn mime_type(&self) -> &str;
}

/// Screen capture capability
///
/// Implementations:
/// - [`FfmpegCapture`](super::FfmpegCapture): screen grab or test pattern through the `ffmpeg` binary
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Request a capture stream from the platform
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, AcquireError>;

    /// Create a recorder over an acquired stream
    fn create_recorder(
        &self,
        stream: &MediaStream,
        options: &RecorderOptions,
    ) -> Result<Box<dyn MediaRecorder>, String>;

    /// Whether the recorder can produce the given mimetype
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}
