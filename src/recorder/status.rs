use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Externally observable progress of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingStatus {
    /// Nothing recorded yet
    #[default]
    Inactive,
    /// A session is acquiring, recording or running its timeline
    Recording,
    /// The recorder delivered its final data
    Finished,
    /// Reading or transcoding the recording failed
    Error,
    /// Capture failed to start or was ended outside the recorder
    Aborted,
    /// The user refused capture permission
    PermissionDenied,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Inactive => "inactive",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Finished => "finished",
            RecordingStatus::Error => "error",
            RecordingStatus::Aborted => "aborted",
            RecordingStatus::PermissionDenied => "permission-denied",
        }
    }

    /// Whether the status ends a session
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordingStatus::Inactive | RecordingStatus::Recording)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the owning UI should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityIntent {
    pub widget_hidden: bool,
    pub chrome_hidden: bool,
}

/// Timing of the recording timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineConfig {
    /// Seconds the widget is visible in the recording
    pub video_length: f64,
    /// Seconds per UI transition
    pub transition_duration: f64,
    /// Seconds to wait after stopping before the widget reappears
    pub video_delay: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            video_length: 1.0,
            transition_duration: 1.0,
            video_delay: 1.0,
        }
    }
}

impl TimelineConfig {
    /// Wait for one UI transition to settle
    pub fn settle(&self) -> Duration {
        seconds(self.transition_duration + 1.0)
    }

    /// Main capture window: the visible length plus one trailing transition
    pub fn capture_window(&self) -> Duration {
        seconds(self.video_length + self.transition_duration + 1.0)
    }

    /// Buffer after stopping, before the widget is shown again
    pub fn post_stop(&self) -> Duration {
        seconds(self.video_delay)
    }
}

/// Negative or non-finite values become zero-length waits; values too large
/// for a `Duration` saturate
fn seconds(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// Point-in-time view of the recorder for the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSnapshot {
    pub status: RecordingStatus,
    pub is_transcoding: bool,
    pub video_url: Option<String>,
    pub widget_hidden: bool,
    pub chrome_hidden: bool,
    pub chunks: usize,
}
