//! Screen capture life-cycle
//!
//! This module owns the capture side of a recording:
//! - `CaptureBackend`, `MediaTrack` and `MediaRecorder` traits over the platform capability
//! - `CaptureManager` / `CaptureSession` for acquisition, external-stop detection and release
//! - `FfmpegCapture`, a backend built on the `ffmpeg` binary

pub mod backend;
pub mod ffmpeg;
pub mod session;

pub use backend::{
    AcquireError, AcquireErrorKind, CaptureBackend, CaptureConstraints, MediaEvent,
    MediaRecorder, MediaStream, MediaTrack, RecorderOptions, RecorderState, TrackKind,
    TrackState,
};
pub use ffmpeg::{CaptureSource, FfmpegCapture, FfmpegCaptureConfig};
pub use session::{CaptureManager, CaptureSession};
