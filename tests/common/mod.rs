// In-memory fakes for the capture platform, transcoding engine and UI bridge
//
// The fakes record every call so tests can assert on exactly what the
// recorder asked for and when.

#![allow(dead_code)]

use async_trait::async_trait;
use baseline_recorder::capture::{
    AcquireError, AcquireErrorKind, CaptureBackend, CaptureConstraints, CaptureManager,
    MediaEvent, MediaRecorder, MediaStream, MediaTrack, RecorderOptions, RecorderState,
    TrackKind, TrackState,
};
use baseline_recorder::transcode::{
    ObjectUrlStore, TranscodeEngine, TranscodeError, TranscodeSettings, Transcoder,
};
use baseline_recorder::{PresentationBridge, ScreenRecorder, TimelineConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ============================================================================
// Capture
// ============================================================================

pub struct FakeTrack {
    id: String,
    state: watch::Sender<TrackState>,
    pub stop_calls: AtomicUsize,
}

impl FakeTrack {
    pub fn new(id: &str) -> Arc<Self> {
        let (state, _) = watch::channel(TrackState::Live);
        Arc::new(Self {
            id: id.to_string(),
            state,
            stop_calls: AtomicUsize::new(0),
        })
    }

    /// The user ended sharing from outside the application
    pub fn end_externally(&self) {
        self.state.send_replace(TrackState::Ended);
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(TrackState::Ended);
    }

    fn state(&self) -> TrackState {
        *self.state.borrow()
    }

    async fn ended(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }
}

/// Shared control over every recorder the fake backend creates
#[derive(Default)]
pub struct RecorderControl {
    state: Mutex<Option<RecorderState>>,
    events: Mutex<Option<mpsc::UnboundedSender<MediaEvent>>>,
    mime_type: Mutex<String>,
    /// Fragments delivered when `stop` is called
    pub flush_on_stop: Mutex<Vec<Vec<u8>>>,
    pub fail_start: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl RecorderControl {
    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Deliver a fragment as the platform would
    pub fn emit(&self, data: &[u8]) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(MediaEvent::DataAvailable(data.to_vec()));
        }
    }

    /// The recorder stopped because its source went away
    pub fn end_by_source(&self) {
        *self.state.lock().unwrap() = Some(RecorderState::Inactive);
        let mime_type = self.mime_type.lock().unwrap().clone();
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(MediaEvent::Stopped {
                mime_type,
                source_ended: true,
            });
        }
    }
}

pub struct FakeRecorder {
    control: Arc<RecorderControl>,
    mime_type: String,
}

impl MediaRecorder for FakeRecorder {
    fn start(&mut self, events: mpsc::UnboundedSender<MediaEvent>) -> Result<(), String> {
        self.control.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_start.load(Ordering::SeqCst) {
            return Err("encoder unavailable".to_string());
        }
        *self.control.state.lock().unwrap() = Some(RecorderState::Recording);
        *self.control.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        self.control.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.control.state.lock().unwrap() = Some(RecorderState::Inactive);

        let flushed: Vec<Vec<u8>> = self.control.flush_on_stop.lock().unwrap().clone();
        if let Some(events) = self.control.events.lock().unwrap().as_ref() {
            for data in flushed {
                let _ = events.send(MediaEvent::DataAvailable(data));
            }
            let _ = events.send(MediaEvent::Stopped {
                mime_type: self.mime_type.clone(),
                source_ended: false,
            });
        }
    }

    fn state(&self) -> RecorderState {
        self.control
            .state
            .lock()
            .unwrap()
            .unwrap_or(RecorderState::Inactive)
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

pub struct FakeBackend {
    pub fail_with: Mutex<Option<AcquireError>>,
    pub supports_mp4: AtomicBool,
    pub acquire_calls: AtomicUsize,
    pub recorder: Arc<RecorderControl>,
    pub options: Mutex<Option<RecorderOptions>>,
    /// Time the user spends in the share picker
    pub acquire_delay: Mutex<Duration>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_with: Mutex::new(None),
            supports_mp4: AtomicBool::new(true),
            acquire_calls: AtomicUsize::new(0),
            recorder: Arc::new(RecorderControl::default()),
            options: Mutex::new(None),
            acquire_delay: Mutex::new(Duration::ZERO),
            tracks: Mutex::new(Vec::new()),
        })
    }

    pub fn deny(&self, kind: AcquireErrorKind, message: &str) {
        *self.fail_with.lock().unwrap() = Some(AcquireError::new(kind, message));
    }

    /// Video track of the most recent stream
    pub fn last_track(&self) -> Arc<FakeTrack> {
        self.tracks.lock().unwrap().last().cloned().expect("no stream acquired")
    }

    pub fn acquisitions(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn acquire(&self, _constraints: &CaptureConstraints) -> Result<MediaStream, AcquireError> {
        let n = self.acquire_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.acquire_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }

        let track = FakeTrack::new(&format!("video-{}", n));
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        Ok(MediaStream::new(format!("stream-{}", n), vec![track]))
    }

    fn create_recorder(
        &self,
        _stream: &MediaStream,
        options: &RecorderOptions,
    ) -> Result<Box<dyn MediaRecorder>, String> {
        *self.options.lock().unwrap() = Some(options.clone());
        *self.recorder.mime_type.lock().unwrap() = options.mime_type.clone();
        *self.recorder.state.lock().unwrap() = Some(RecorderState::Inactive);
        Ok(Box::new(FakeRecorder {
            control: Arc::clone(&self.recorder),
            mime_type: options.mime_type.clone(),
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime_type != "video/mp4" || self.supports_mp4.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Transcoding
// ============================================================================

#[derive(Default)]
pub struct FakeEngine {
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub commands: Mutex<Vec<Vec<String>>>,
    pub fail_load: AtomicBool,
    pub fail_exec: AtomicBool,
    /// Simulated encode time
    pub exec_time: Mutex<Duration>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_command(&self) -> Option<Vec<String>> {
        self.commands.lock().unwrap().last().cloned()
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    async fn load(&self) -> Result<(), TranscodeError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(TranscodeError::Load("engine bundle missing".to_string()));
        }
        self.files.lock().unwrap().clear();
        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), TranscodeError> {
        self.files.lock().unwrap().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<(), TranscodeError> {
        self.commands.lock().unwrap().push(args.to_vec());

        let exec_time = *self.exec_time.lock().unwrap();
        if !exec_time.is_zero() {
            tokio::time::sleep(exec_time).await;
        }

        if self.fail_exec.load(Ordering::SeqCst) {
            return Err(TranscodeError::Exec("invalid data found".to_string()));
        }

        let input = args
            .iter()
            .position(|arg| arg == "-i")
            .and_then(|i| args.get(i + 1))
            .and_then(|name| self.file(name))
            .ok_or_else(|| TranscodeError::Exec("no input".to_string()))?;
        let output = args.last().cloned().unwrap_or_default();

        let mut encoded = b"MP4:".to_vec();
        encoded.extend(input);
        self.files.lock().unwrap().insert(output, encoded);
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, TranscodeError> {
        self.file(name)
            .ok_or_else(|| TranscodeError::File(format!("{} not found", name)))
    }
}

// ============================================================================
// Presentation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Widget,
    Chrome,
}

/// Logs every visibility transition with its offset from creation
pub struct RecordingBridge {
    started: Instant,
    pub log: Mutex<Vec<(Duration, Surface, bool)>>,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn entries(&self) -> Vec<(u64, Surface, bool)> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(at, surface, hidden)| (at.as_secs(), *surface, *hidden))
            .collect()
    }

    fn push(&self, surface: Surface, hidden: bool) {
        self.log
            .lock()
            .unwrap()
            .push((self.started.elapsed(), surface, hidden));
    }
}

impl PresentationBridge for RecordingBridge {
    fn on_widget_hidden_change(&self, hidden: bool) {
        self.push(Surface::Widget, hidden);
    }

    fn on_chrome_hidden_change(&self, hidden: bool) {
        self.push(Surface::Chrome, hidden);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub recorder: Arc<ScreenRecorder>,
    pub backend: Arc<FakeBackend>,
    pub engine: Arc<FakeEngine>,
    pub bridge: Arc<RecordingBridge>,
    pub urls: ObjectUrlStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeline(TimelineConfig::default())
    }

    pub fn with_timeline(timeline: TimelineConfig) -> Self {
        let backend = FakeBackend::new();
        let engine = FakeEngine::new();
        let bridge = RecordingBridge::new();
        let urls = ObjectUrlStore::default();

        let capture = CaptureManager::new(backend.clone(), CaptureConstraints::default());
        let transcoder = Transcoder::new(engine.clone(), urls.clone(), TranscodeSettings::default());
        let recorder = Arc::new(ScreenRecorder::new(
            timeline,
            capture,
            transcoder,
            bridge.clone(),
        ));

        Self {
            recorder,
            backend,
            engine,
            bridge,
            urls,
        }
    }

    /// Fragments the fake recorder delivers when stopped
    pub fn flush_on_stop(&self, chunks: &[&[u8]]) {
        *self.backend.recorder.flush_on_stop.lock().unwrap() =
            chunks.iter().map(|c| c.to_vec()).collect();
    }

    /// Start a recording on a background task
    pub fn spawn_start(&self) -> tokio::task::JoinHandle<baseline_recorder::RecordingStatus> {
        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move { recorder.start().await })
    }
}
