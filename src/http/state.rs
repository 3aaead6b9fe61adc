use crate::recorder::ScreenRecorder;
use crate::transcode::ObjectUrlStore;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single recorder this service drives
    pub recorder: Arc<ScreenRecorder>,

    /// Registry behind the recorder's deliverable references
    pub urls: ObjectUrlStore,

    /// Feature the recording demonstrates; used for download names
    pub feature_id: Arc<str>,
}

impl AppState {
    pub fn new(recorder: Arc<ScreenRecorder>, feature_id: impl Into<Arc<str>>) -> Self {
        let urls = recorder.object_urls().clone();
        Self {
            recorder,
            urls,
            feature_id: feature_id.into(),
        }
    }
}
