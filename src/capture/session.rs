use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{
    AcquireError, AcquireErrorKind, CaptureBackend, CaptureConstraints, MediaRecorder,
    MediaStream, RecorderOptions,
};
use crate::error::{RecordingError, RecordingResult};

/// A granted capture stream and the watcher on its primary track
pub struct CaptureSession {
    stream: MediaStream,
    released: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(stream: MediaStream) -> Self {
        Self {
            stream,
            released: Arc::new(AtomicBool::new(false)),
            watcher: None,
        }
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Call `on_stopped` once if the primary video track ends without `release`
    ///
    /// Replaces any previous watcher, so repeated calls never stack observers.
    pub fn watch_for_external_stop<F>(&mut self, on_stopped: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(track) = self.stream.primary_video_track().cloned() else {
            warn!("Capture stream {} has no video track to watch", self.stream.id());
            return;
        };

        if let Some(previous) = self.watcher.take() {
            previous.abort();
        }

        let released = Arc::clone(&self.released);
        self.watcher = Some(tokio::spawn(async move {
            track.ended().await;
            if released.load(Ordering::SeqCst) {
                return;
            }
            info!("Track {} ended outside the recorder", track.id());
            on_stopped();
        }));
    }

    /// Stop every track. Idempotent.
    pub fn release(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        for track in self.stream.tracks() {
            track.stop();
        }

        debug!(
            "Released capture stream {} ({} tracks)",
            self.stream.id(),
            self.stream.tracks().len()
        );
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquires capture streams and classifies acquisition failures
#[derive(Clone)]
pub struct CaptureManager {
    backend: Arc<dyn CaptureBackend>,
    constraints: CaptureConstraints,
}

impl CaptureManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, constraints: CaptureConstraints) -> Self {
        Self {
            backend,
            constraints,
        }
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    /// Request a capture stream
    pub async fn acquire(&self) -> RecordingResult<CaptureSession> {
        info!(
            "Requesting capture stream from {} ({} fps)",
            self.backend.name(),
            self.constraints.frame_rate_ideal
        );

        let stream = self
            .backend
            .acquire(&self.constraints)
            .await
            .map_err(classify)?;

        info!(
            "Capture stream {} granted with {} tracks",
            stream.id(),
            stream.tracks().len()
        );

        Ok(CaptureSession::new(stream))
    }

    /// Attach the external-stop observer to a session
    pub fn watch_for_external_stop<F>(&self, session: &mut CaptureSession, on_stopped: F)
    where
        F: FnOnce() + Send + 'static,
    {
        session.watch_for_external_stop(on_stopped);
    }

    /// Release a session if there is one
    pub fn release(&self, session: Option<&mut CaptureSession>) {
        if let Some(session) = session {
            session.release();
        }
    }

    /// Create a recorder for the session's stream
    pub fn create_recorder(
        &self,
        session: &CaptureSession,
        options: &RecorderOptions,
    ) -> RecordingResult<Box<dyn MediaRecorder>> {
        self.backend
            .create_recorder(session.stream(), options)
            .map_err(RecordingError::Recorder)
    }

    /// Preferred recording mimetype: MP4 where supported, WebM otherwise
    pub fn preferred_mime_type(&self) -> &'static str {
        if self.backend.is_type_supported("video/mp4") {
            "video/mp4"
        } else {
            "video/webm"
        }
    }
}

/// Map a backend failure onto the two-way public distinction
fn classify(err: AcquireError) -> RecordingError {
    match err.kind {
        AcquireErrorKind::NotAllowed => RecordingError::PermissionDenied(err.message),
        // Unclassified failures fall back to inspecting the message.
        AcquireErrorKind::Other if mentions_denial(&err.message) => {
            RecordingError::PermissionDenied(err.message)
        }
        _ => RecordingError::Acquisition(err.to_string()),
    }
}

fn mentions_denial(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("denied") || message.contains("not allowed")
}
