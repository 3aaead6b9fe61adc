//! Recording orchestration
//!
//! `ScreenRecorder` sequences one recording: it acquires a capture stream,
//! drives the timed visibility changes around the capture window, collects the
//! recorded fragments and hands them to the transcoder once the recorder
//! reports it has stopped.
//!
//! Two kinds of signals meet here. The timeline runs strictly in order and is
//! cancelled as a whole through the shared `TimeoutSet`. Recorder and track
//! events arrive asynchronously on a per-session pump task. Every buffer and
//! status mutation from the pump is guarded by the session's active flag, and
//! the recorder's own stop event is what moves the status to `finished`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::bridge::PresentationBridge;
use super::chunks::ChunkBuffer;
use super::status::{RecorderSnapshot, RecordingStatus, TimelineConfig, VisibilityIntent};
use crate::capture::{CaptureManager, CaptureSession, MediaEvent, MediaRecorder, RecorderOptions, RecorderState};
use crate::error::RecordingError;
use crate::timer::{Cancelled, TimeoutSet};
use crate::transcode::{DeliverableMedia, ObjectUrlStore, Transcoder};

/// Bitrate requested from the recorder unless configured otherwise
pub const DEFAULT_VIDEO_BITS_PER_SECOND: u64 = 400_000_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why the timeline ended early
enum Interrupted {
    Cancelled,
    Failed(RecordingError),
}

impl From<Cancelled> for Interrupted {
    fn from(_: Cancelled) -> Self {
        Interrupted::Cancelled
    }
}

/// Everything owned by one recording session
struct SessionRecord {
    id: Uuid,
    /// Accepting recorder data; cleared by the recorder's stop event or teardown
    active: AtomicBool,
    /// Torn down; the session must not touch shared state any more
    disposed: AtomicBool,
    capture: Mutex<Option<CaptureSession>>,
    recorder: Mutex<Box<dyn MediaRecorder>>,
    mime_type: Mutex<String>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRecord {
    fn new(capture: CaptureSession, recorder: Box<dyn MediaRecorder>, mime_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            capture: Mutex::new(Some(capture)),
            recorder: Mutex::new(recorder),
            mime_type: Mutex::new(mime_type.to_string()),
            pump: Mutex::new(None),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn start_recorder(&self, events: mpsc::UnboundedSender<MediaEvent>) -> Result<(), String> {
        lock(&self.recorder).start(events)
    }

    /// Issue the recorder's stop call if it is recording
    fn stop_recorder(&self) -> bool {
        let mut recorder = lock(&self.recorder);
        if recorder.state() == RecorderState::Recording {
            recorder.stop();
            true
        } else {
            false
        }
    }

    fn release_capture(&self) {
        if let Some(capture) = lock(&self.capture).as_mut() {
            capture.release();
        }
    }

    /// Stop everything and detach from shared state. Idempotent.
    fn retire(&self) {
        self.active.store(false, Ordering::SeqCst);
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_recorder();
        let capture = lock(&self.capture).take();
        if let Some(mut capture) = capture {
            capture.release();
        }
        let pump = lock(&self.pump).take();
        if let Some(pump) = pump {
            pump.abort();
        }
        debug!(session = %self.id, "Session retired");
    }
}

struct EngineInner {
    timeline: TimelineConfig,
    capture: CaptureManager,
    transcoder: Transcoder,
    bridge: Arc<dyn PresentationBridge>,
    timeouts: TimeoutSet,
    state: watch::Sender<RecorderSnapshot>,
    chunks: Mutex<ChunkBuffer>,
    session: Mutex<Option<Arc<SessionRecord>>>,
    deliverable: Mutex<Option<DeliverableMedia>>,
    transcode_task: Mutex<Option<JoinHandle<()>>>,
    video_bits_per_second: u64,
    disposed: AtomicBool,
}

impl EngineInner {
    fn status(&self) -> RecordingStatus {
        self.state.borrow().status
    }

    /// Atomically move to `recording` unless already there
    fn begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.status == RecordingStatus::Recording {
                false
            } else {
                state.status = RecordingStatus::Recording;
                true
            }
        })
    }

    fn set_status(&self, status: RecordingStatus) {
        let changed = self.state.send_if_modified(|state| {
            let changed = state.status != status;
            state.status = status;
            changed
        });
        if changed {
            info!(%status, "Recording status changed");
        }
    }

    fn set_widget_hidden(&self, hidden: bool) {
        self.state.send_modify(|state| state.widget_hidden = hidden);
        self.bridge.on_widget_hidden_change(hidden);
    }

    fn set_chrome_hidden(&self, hidden: bool) {
        self.state.send_modify(|state| state.chrome_hidden = hidden);
        self.bridge.on_chrome_hidden_change(hidden);
    }

    fn set_transcoding(&self, transcoding: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_transcoding != transcoding;
            state.is_transcoding = transcoding;
            changed
        });
    }

    fn clear_chunks(&self) {
        lock(&self.chunks).clear();
        self.state.send_if_modified(|state| {
            let changed = state.chunks != 0;
            state.chunks = 0;
            changed
        });
    }

    fn current_session(&self) -> Option<Arc<SessionRecord>> {
        lock(&self.session).clone()
    }

    fn is_current(&self, id: Uuid) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|record| record.id == id && !record.is_disposed())
    }

    fn revoke_deliverable(&self) {
        if let Some(previous) = lock(&self.deliverable).take() {
            self.transcoder.urls().revoke_object_url(&previous.url);
        }
        self.state.send_if_modified(|state| state.video_url.take().is_some());
    }

    fn abort_transcode(&self) {
        if let Some(task) = lock(&self.transcode_task).take() {
            task.abort();
        }
        self.set_transcoding(false);
    }

    /// Reset everything a session touched. Idempotent.
    fn cleanup(&self) {
        let record = lock(&self.session).take();
        if let Some(record) = record {
            record.retire();
        }
        self.timeouts.cancel_all();
        self.clear_chunks();
        self.revoke_deliverable();
        self.set_widget_hidden(false);
        self.set_chrome_hidden(false);
    }

    /// End the session with a terminal error status
    fn fail(&self, err: RecordingError) -> RecordingStatus {
        let status = err.status();
        error!(stage = err.stage(), error = %err, "Recording failed");
        self.cleanup();
        if self.disposed.load(Ordering::SeqCst) {
            return self.status();
        }
        self.set_status(status);
        status
    }

    /// Wait on the shared timeout set unless the session was torn down
    async fn wait(&self, record: &SessionRecord, duration: std::time::Duration) -> Result<(), Cancelled> {
        if record.is_disposed() {
            return Err(Cancelled);
        }
        // Retiring flags the record before cancelling, so a wait registered
        // after the cancel still sees it.
        self.timeouts
            .delay_unless(duration, || record.is_disposed())
            .await?;
        if record.is_disposed() {
            return Err(Cancelled);
        }
        Ok(())
    }

    async fn run_timeline(
        &self,
        record: &SessionRecord,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<(), Interrupted> {
        // Nothing but the widget may be captured; hide both before anything is recorded.
        self.set_widget_hidden(true);
        self.set_chrome_hidden(true);

        let settle = self.timeline.settle();
        self.wait(record, settle).await?;

        record
            .start_recorder(events)
            .map_err(|e| Interrupted::Failed(RecordingError::Recorder(e)))?;
        info!(session = %record.id, "Capture recording started");
        self.revoke_deliverable();

        self.set_widget_hidden(false);
        self.wait(record, self.timeline.capture_window()).await?;

        // Hide before stopping so the exit transition is not in the footage.
        self.set_widget_hidden(true);
        self.wait(record, settle).await?;

        record.stop_recorder();
        record.release_capture();

        self.set_chrome_hidden(false);
        self.wait(record, self.timeline.post_stop()).await?;
        self.set_widget_hidden(false);

        Ok(())
    }

    fn append_chunk(&self, record: &SessionRecord, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        if !record.is_active() {
            debug!(session = %record.id, bytes = data.len(), "Dropping fragment for inactive session");
            return;
        }

        let count = {
            let mut chunks = lock(&self.chunks);
            chunks.push(data);
            chunks.len()
        };
        self.state.send_modify(|state| state.chunks = count);
    }

    fn on_recorder_stopped(self: &Arc<Self>, record: &SessionRecord, mime_type: String) {
        *lock(&record.mime_type) = mime_type;

        if !record.active.swap(false, Ordering::SeqCst) {
            debug!(session = %record.id, "Recorder stop for an inactive session ignored");
            return;
        }

        let chunks = lock(&self.chunks).snapshot();
        let will_transcode = !chunks.is_empty();
        // Published together so no observer sees `finished` before transcoding is flagged.
        self.state.send_modify(|state| {
            state.status = RecordingStatus::Finished;
            state.is_transcoding = will_transcode;
        });
        info!(session = %record.id, chunks = chunks.len(), "Recording finished");

        if !will_transcode {
            warn!(session = %record.id, "Recording finished without data; nothing to transcode");
            return;
        }

        let inner = Arc::clone(self);
        let id = record.id;
        let mime_type = lock(&record.mime_type).clone();
        let task = tokio::spawn(async move {
            inner.run_transcode(id, chunks, mime_type).await;
        });
        if let Some(previous) = lock(&self.transcode_task).replace(task) {
            previous.abort();
        }
    }

    async fn run_transcode(&self, id: Uuid, chunks: Vec<Arc<[u8]>>, mime_type: String) {
        // The old reference goes away before the adapter mints a new one.
        self.revoke_deliverable();
        self.set_transcoding(true);

        let result = self.transcoder.transcode(&chunks, &mime_type).await;
        self.set_transcoding(false);

        match result {
            Ok(media) if self.is_current(id) => {
                let url = media.url.clone();
                *lock(&self.deliverable) = Some(media);
                self.state.send_modify(|state| state.video_url = Some(url));
            }
            Ok(media) => {
                debug!(session = %id, "Discarding transcode result for a retired session");
                self.transcoder.urls().revoke_object_url(&media.url);
            }
            Err(e) => {
                let err = RecordingError::from(e);
                error!(stage = err.stage(), error = %err, "Video processing failed");
                if self.is_current(id) {
                    self.set_status(err.status());
                }
            }
        }
    }
}

/// Deliver recorder and track events for one session
async fn pump_events(
    inner: Arc<EngineInner>,
    record: Arc<SessionRecord>,
    mut media: mpsc::UnboundedReceiver<MediaEvent>,
    mut track_ended: oneshot::Receiver<()>,
) {
    let mut watching = true;

    loop {
        tokio::select! {
            ended = &mut track_ended, if watching => {
                if ended.is_err() {
                    // Watcher went away with the released capture.
                    watching = false;
                    continue;
                }
                if !record.is_disposed() {
                    inner.fail(RecordingError::ExternalStop);
                }
                break;
            }
            event = media.recv() => {
                let Some(event) = event else { break };
                if record.is_disposed() {
                    break;
                }
                match event {
                    MediaEvent::DataAvailable(data) => inner.append_chunk(&record, data),
                    MediaEvent::Stopped { source_ended: true, .. } if record.is_active() => {
                        inner.fail(RecordingError::ExternalStop);
                        break;
                    }
                    MediaEvent::Stopped { mime_type, .. } => {
                        inner.on_recorder_stopped(&record, mime_type);
                    }
                }
            }
        }
    }
}

/// Orchestrates screen recordings of the widget
pub struct ScreenRecorder {
    inner: Arc<EngineInner>,
}

impl ScreenRecorder {
    pub fn new(
        timeline: TimelineConfig,
        capture: CaptureManager,
        transcoder: Transcoder,
        bridge: Arc<dyn PresentationBridge>,
    ) -> Self {
        Self::with_bitrate(timeline, capture, transcoder, bridge, DEFAULT_VIDEO_BITS_PER_SECOND)
    }

    pub fn with_bitrate(
        timeline: TimelineConfig,
        capture: CaptureManager,
        transcoder: Transcoder,
        bridge: Arc<dyn PresentationBridge>,
        video_bits_per_second: u64,
    ) -> Self {
        let (state, _) = watch::channel(RecorderSnapshot {
            status: RecordingStatus::Inactive,
            is_transcoding: false,
            video_url: None,
            widget_hidden: false,
            chrome_hidden: false,
            chunks: 0,
        });

        Self {
            inner: Arc::new(EngineInner {
                timeline,
                capture,
                transcoder,
                bridge,
                timeouts: TimeoutSet::new(),
                state,
                chunks: Mutex::new(ChunkBuffer::new()),
                session: Mutex::new(None),
                deliverable: Mutex::new(None),
                transcode_task: Mutex::new(None),
                video_bits_per_second,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Run one full recording
    ///
    /// Resolves once the timeline has completed or was interrupted, returning
    /// the status at that point. Ignored while a recording is in progress.
    pub async fn start(&self) -> RecordingStatus {
        if let Err(status) = self.claim() {
            return status;
        }
        self.run_claimed().await
    }

    /// Claim the recorder now and run the recording on a background task
    ///
    /// Fails with the current status if a recording is already in progress or
    /// the recorder was disposed.
    pub fn spawn_start(self: &Arc<Self>) -> Result<JoinHandle<RecordingStatus>, RecordingStatus> {
        self.claim()?;
        let recorder = Arc::clone(self);
        Ok(tokio::spawn(async move { recorder.run_claimed().await }))
    }

    /// Move to `recording` unless disposed or already recording
    fn claim(&self) -> Result<(), RecordingStatus> {
        let inner = &self.inner;

        if inner.disposed.load(Ordering::SeqCst) {
            warn!("start() called on a disposed recorder");
            return Err(inner.status());
        }
        if !inner.begin() {
            warn!("start() ignored: a recording is already in progress");
            return Err(RecordingStatus::Recording);
        }
        Ok(())
    }

    async fn run_claimed(&self) -> RecordingStatus {
        let inner = &self.inner;

        info!("Starting screen recording ({:?})", inner.timeline);

        let previous = lock(&inner.session).take();
        if let Some(previous) = previous {
            previous.retire();
        }
        inner.abort_transcode();
        inner.clear_chunks();

        let mut capture = match inner.capture.acquire().await {
            Ok(capture) => capture,
            Err(e) => return inner.fail(e),
        };

        if inner.disposed.load(Ordering::SeqCst) {
            // Disposed while the permission prompt was open.
            capture.release();
            return RecordingStatus::Inactive;
        }

        let (ended_tx, ended_rx) = oneshot::channel();
        inner.capture.watch_for_external_stop(&mut capture, move || {
            let _ = ended_tx.send(());
        });

        let mime_type = inner.capture.preferred_mime_type();
        let options = RecorderOptions {
            mime_type: mime_type.to_string(),
            video_bits_per_second: inner.video_bits_per_second,
        };
        let recorder = match inner.capture.create_recorder(&capture, &options) {
            Ok(recorder) => recorder,
            Err(e) => {
                inner.capture.release(Some(&mut capture));
                return inner.fail(e);
            }
        };

        let record = Arc::new(SessionRecord::new(capture, recorder, mime_type));
        *lock(&inner.session) = Some(Arc::clone(&record));

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(
            Arc::clone(inner),
            Arc::clone(&record),
            media_rx,
            ended_rx,
        ));
        *lock(&record.pump) = Some(pump);

        info!(session = %record.id, "Recording session {} set up ({})", record.id, mime_type);

        match inner.run_timeline(&record, media_tx).await {
            Ok(()) => info!(session = %record.id, "Recording timeline complete"),
            Err(Interrupted::Cancelled) => {
                debug!(session = %record.id, "Recording timeline cancelled")
            }
            Err(Interrupted::Failed(e)) => {
                if !record.is_disposed() {
                    return inner.fail(e);
                }
            }
        }

        inner.status()
    }

    /// Stop an in-progress recording early
    ///
    /// Stops the recorder and releases the capture only if the recorder is
    /// still recording. The status moves on when the recorder reports back.
    pub fn stop(&self) {
        let Some(record) = self.inner.current_session() else {
            debug!("stop() ignored: no session");
            return;
        };
        if record.is_disposed() {
            return;
        }

        if record.stop_recorder() {
            record.release_capture();
            info!(session = %record.id, "Recording stopped on request");
        } else {
            debug!(session = %record.id, "stop() ignored: recorder is not recording");
        }
    }

    /// Tear everything down; no scheduled delay survives this
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.abort_transcode();
        self.inner.cleanup();
        // Always notify, so waiters re-check the disposed flag.
        self.inner
            .state
            .send_modify(|state| state.status = RecordingStatus::Inactive);
        info!("Screen recorder disposed");
    }

    pub fn status(&self) -> RecordingStatus {
        self.inner.status()
    }

    /// Receive a notification on every observable change
    pub fn subscribe(&self) -> watch::Receiver<RecorderSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Wait until the status is terminal and no transcode is running,
    /// or the recorder is disposed
    pub async fn wait_until_settled(&self) -> RecorderSnapshot {
        let disposed = &self.inner.disposed;
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|state| {
                disposed.load(Ordering::SeqCst)
                    || (state.status.is_terminal() && !state.is_transcoding)
            })
            .await
            .map(|state| state.clone());
        match settled {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }

    pub fn is_transcoding(&self) -> bool {
        self.inner.state.borrow().is_transcoding
    }

    pub fn deliverable(&self) -> Option<DeliverableMedia> {
        lock(&self.inner.deliverable).clone()
    }

    pub fn deliverable_url(&self) -> Option<String> {
        self.inner.state.borrow().video_url.clone()
    }

    pub fn visibility(&self) -> VisibilityIntent {
        let state = self.inner.state.borrow();
        VisibilityIntent {
            widget_hidden: state.widget_hidden,
            chrome_hidden: state.chrome_hidden,
        }
    }

    /// Fragments collected by the current session
    pub fn chunk_count(&self) -> usize {
        lock(&self.inner.chunks).len()
    }

    /// Whether a capture stream handle is held
    pub fn has_stream(&self) -> bool {
        self.inner
            .current_session()
            .is_some_and(|record| lock(&record.capture).is_some())
    }

    /// Scheduled delays still outstanding
    pub fn pending_delays(&self) -> usize {
        self.inner.timeouts.pending()
    }

    pub fn timeline(&self) -> &TimelineConfig {
        &self.inner.timeline
    }

    pub fn object_urls(&self) -> &ObjectUrlStore {
        self.inner.transcoder.urls()
    }
}

impl Drop for ScreenRecorder {
    fn drop(&mut self) {
        self.dispose();
    }
}
