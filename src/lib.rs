pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod recorder;
pub mod timer;
pub mod transcode;

pub use capture::{
    CaptureBackend, CaptureConstraints, CaptureManager, CaptureSession, FfmpegCapture,
    MediaEvent, MediaRecorder, MediaStream, MediaTrack,
};
pub use config::Config;
pub use error::{RecordingError, RecordingResult};
pub use http::{create_router, AppState};
pub use recorder::{
    PresentationBridge, RecorderSnapshot, RecordingStatus, ScreenRecorder, TimelineConfig,
    TracingBridge, VisibilityIntent,
};
pub use timer::{Cancelled, TimeoutSet};
pub use transcode::{DeliverableMedia, FfmpegEngine, ObjectUrlStore, TranscodeEngine, Transcoder};
