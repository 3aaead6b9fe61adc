//! Recording state machine
//!
//! [`ScreenRecorder`] owns one recording at a time: capture acquisition, the
//! visibility timeline, fragment collection and the hand-off to transcoding.
//! The presentation layer observes it through [`RecorderSnapshot`] updates and
//! a [`PresentationBridge`].

mod bridge;
mod chunks;
mod engine;
mod status;

pub use bridge::{PresentationBridge, TracingBridge};
pub use chunks::ChunkBuffer;
pub use engine::{ScreenRecorder, DEFAULT_VIDEO_BITS_PER_SECOND};
pub use status::{RecorderSnapshot, RecordingStatus, TimelineConfig, VisibilityIntent};
