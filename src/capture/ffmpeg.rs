//! Capture backend driven by the `ffmpeg` binary
//!
//! Acquisition runs a one-frame probe against the configured source so a
//! refused or missing display is reported before the timeline starts. The
//! recorder then spawns the encoding process and forwards its output in
//! timeslice-sized fragments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{
    AcquireError, AcquireErrorKind, CaptureBackend, CaptureConstraints, MediaEvent,
    MediaRecorder, MediaStream, MediaTrack, RecorderOptions, RecorderState, TrackKind,
    TrackState,
};

/// What the ffmpeg backend captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureSource {
    /// The desktop (x11grab, avfoundation or gdigrab depending on platform)
    #[default]
    Screen,
    /// Synthetic test pattern, needs no display
    TestPattern,
}

/// Settings for [`FfmpegCapture`]
#[derive(Debug, Clone)]
pub struct FfmpegCaptureConfig {
    pub binary: String,
    pub source: CaptureSource,
    /// Platform display identifier (e.g. `:0.0`); platform default when unset
    pub display: Option<String>,
    /// How often buffered output is delivered as a fragment
    pub timeslice: Duration,
    pub probe_timeout: Duration,
}

impl Default for FfmpegCaptureConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            source: CaptureSource::Screen,
            display: None,
            timeslice: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

const SUPPORTED_CONTAINERS: [&str; 3] = ["video/mp4", "video/webm", "video/x-matroska"];

/// Time the encoder gets to flush after `q` before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct FfmpegCapture {
    config: FfmpegCaptureConfig,
}

impl FfmpegCapture {
    pub fn new(config: FfmpegCaptureConfig) -> Self {
        Self { config }
    }

    fn input_args(&self, frame_rate: u32) -> Vec<String> {
        match self.config.source {
            CaptureSource::TestPattern => vec![
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("testsrc2=size=1280x720:rate={}", frame_rate),
            ],
            CaptureSource::Screen => screen_input(self.config.display.as_deref(), frame_rate),
        }
    }
}

#[cfg(target_os = "macos")]
fn screen_input(display: Option<&str>, frame_rate: u32) -> Vec<String> {
    vec![
        "-f".into(),
        "avfoundation".into(),
        "-framerate".into(),
        frame_rate.to_string(),
        "-i".into(),
        format!("{}:none", display.unwrap_or("1")),
    ]
}

#[cfg(target_os = "windows")]
fn screen_input(display: Option<&str>, frame_rate: u32) -> Vec<String> {
    vec![
        "-f".into(),
        "gdigrab".into(),
        "-framerate".into(),
        frame_rate.to_string(),
        "-i".into(),
        display.unwrap_or("desktop").to_string(),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn screen_input(display: Option<&str>, frame_rate: u32) -> Vec<String> {
    let display = display
        .map(str::to_string)
        .or_else(|| std::env::var("DISPLAY").ok())
        .unwrap_or_else(|| ":0.0".to_string());

    vec![
        "-f".into(),
        "x11grab".into(),
        "-framerate".into(),
        frame_rate.to_string(),
        "-i".into(),
        display,
    ]
}

fn h264_args(format: &str, extra: &[&str], bitrate: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(["-b:v".to_string(), bitrate.to_string()]);
    args.extend(extra.iter().map(|s| s.to_string()));
    args.extend(["-f".to_string(), format.to_string(), "-".to_string()]);
    args
}

/// Encoder arguments and negotiated mimetype for a requested container
fn output_args(mime_type: &str, bits_per_second: u64) -> Option<(Vec<String>, &'static str)> {
    let bitrate = bits_per_second.to_string();

    match container(mime_type) {
        "video/mp4" => Some((
            h264_args("mp4", &["-movflags", "frag_keyframe+empty_moov"], &bitrate),
            "video/mp4",
        )),
        "video/x-matroska" => Some((
            h264_args("matroska", &[], &bitrate),
            "video/x-matroska;codecs=avc1",
        )),
        "video/webm" => Some((
            vec![
                "-c:v".into(),
                "libvpx".into(),
                "-deadline".into(),
                "realtime".into(),
                "-b:v".into(),
                bitrate,
                "-f".into(),
                "webm".into(),
                "-".into(),
            ],
            "video/webm;codecs=vp8",
        )),
        _ => None,
    }
}

fn container(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or_default().trim()
}

fn classify_spawn_error(err: &std::io::Error) -> AcquireError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            AcquireError::new(AcquireErrorKind::NotAllowed, err.to_string())
        }
        std::io::ErrorKind::NotFound => AcquireError::new(
            AcquireErrorKind::NotFound,
            format!("ffmpeg binary not found: {}", err),
        ),
        _ => AcquireError::new(AcquireErrorKind::Other, err.to_string()),
    }
}

/// ffmpeg reports device errors only as text; these are the OS strerror strings
fn classify_probe_failure(stderr: &str) -> AcquireError {
    let lower = stderr.to_ascii_lowercase();
    let kind = if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("not authorized")
    {
        AcquireErrorKind::NotAllowed
    } else if lower.contains("cannot open display") || lower.contains("no such file or directory") {
        AcquireErrorKind::NotFound
    } else {
        AcquireErrorKind::Other
    };

    AcquireError::new(kind, stderr.trim().to_string())
}

#[async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, AcquireError> {
        let frame_rate = constraints.frame_rate_ideal.min(constraints.frame_rate_max).max(1);
        if constraints.prefer_current_tab {
            debug!("Surface preference hint has no ffmpeg equivalent; capturing configured source");
        }

        let input = self.input_args(frame_rate);
        let mut probe = Command::new(&self.config.binary);
        probe
            .args(["-hide_banner", "-loglevel", "error"])
            .args(&input)
            .args(["-frames:v", "1", "-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.probe_timeout, probe.output()).await {
            Err(_) => {
                return Err(AcquireError::new(
                    AcquireErrorKind::Aborted,
                    format!("capture probe timed out after {:?}", self.config.probe_timeout),
                ))
            }
            Ok(Err(e)) => return Err(classify_spawn_error(&e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(classify_probe_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let stream_id = format!("ffmpeg-{}", uuid::Uuid::new_v4());
        let track: Arc<dyn MediaTrack> = Arc::new(FfmpegTrack::new(
            format!("{}-video", stream_id),
            frame_rate,
        ));
        info!("Probe succeeded for {:?} source at {} fps", self.config.source, frame_rate);

        Ok(MediaStream::new(stream_id, vec![track]))
    }

    fn create_recorder(
        &self,
        stream: &MediaStream,
        options: &RecorderOptions,
    ) -> Result<Box<dyn MediaRecorder>, String> {
        let track = stream
            .primary_video_track()
            .cloned()
            .ok_or_else(|| "stream has no video track".to_string())?;
        let (output, mime_type) = output_args(&options.mime_type, options.video_bits_per_second)
            .ok_or_else(|| format!("unsupported mimetype: {}", options.mime_type))?;

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.input_args(track.frame_rate().unwrap_or(60)));
        args.push("-an".into());
        args.extend(output);

        Ok(Box::new(FfmpegRecorder {
            binary: self.config.binary.clone(),
            args,
            mime_type: mime_type.to_string(),
            timeslice: self.config.timeslice,
            track,
            recording: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        SUPPORTED_CONTAINERS.contains(&container(mime_type))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Video track of an ffmpeg capture stream
pub struct FfmpegTrack {
    id: String,
    frame_rate: u32,
    state: watch::Sender<TrackState>,
}

impl FfmpegTrack {
    fn new(id: String, frame_rate: u32) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            id,
            frame_rate,
            state,
        }
    }
}

#[async_trait]
impl MediaTrack for FfmpegTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        self.state.send_replace(TrackState::Ended);
    }

    fn state(&self) -> TrackState {
        *self.state.borrow()
    }

    fn frame_rate(&self) -> Option<u32> {
        Some(self.frame_rate)
    }

    async fn ended(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }
}

/// Recorder running one ffmpeg encoding process per `start`
struct FfmpegRecorder {
    binary: String,
    args: Vec<String>,
    mime_type: String,
    timeslice: Duration,
    track: Arc<dyn MediaTrack>,
    recording: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl MediaRecorder for FfmpegRecorder {
    fn start(&mut self, events: mpsc::UnboundedSender<MediaEvent>) -> Result<(), String> {
        if self.recording.load(Ordering::SeqCst) {
            return Err("recorder is already recording".to_string());
        }
        if self.track.state() == TrackState::Ended {
            return Err("capture track has already ended".to_string());
        }

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start encoder: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "encoder stdout unavailable".to_string())?;
        let stdin = child.stdin.take();

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.recording.store(true, Ordering::SeqCst);

        info!("Encoder started ({})", self.mime_type);

        tokio::spawn(run_encoder(EncoderTask {
            child,
            stdout,
            stdin,
            stop_rx,
            track: Arc::clone(&self.track),
            events,
            timeslice: self.timeslice,
            mime_type: self.mime_type.clone(),
            recording: Arc::clone(&self.recording),
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn state(&self) -> RecorderState {
        if self.recording.load(Ordering::SeqCst) {
            RecorderState::Recording
        } else {
            RecorderState::Inactive
        }
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

struct EncoderTask {
    child: Child,
    stdout: ChildStdout,
    stdin: Option<ChildStdin>,
    stop_rx: oneshot::Receiver<()>,
    track: Arc<dyn MediaTrack>,
    events: mpsc::UnboundedSender<MediaEvent>,
    timeslice: Duration,
    mime_type: String,
    recording: Arc<AtomicBool>,
}

async fn request_quit(stdin: &mut Option<ChildStdin>) {
    if let Some(mut stdin) = stdin.take() {
        if let Err(e) = stdin.write_all(b"q").await {
            debug!("Encoder stdin closed before quit: {}", e);
        }
    }
}

async fn grace_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_encoder(task: EncoderTask) {
    let EncoderTask {
        mut child,
        mut stdout,
        mut stdin,
        mut stop_rx,
        track,
        events,
        timeslice,
        mime_type,
        recording,
    } = task;

    let mut pending = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut tick = tokio::time::interval(timeslice);
    tick.tick().await;

    let mut stopping = false;
    let mut deadline = None;
    let track_ended = track.ended();
    tokio::pin!(track_ended);

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) => {
                    warn!("Failed to read encoder output: {}", e);
                    break;
                }
            },
            _ = tick.tick() => {
                if !pending.is_empty() {
                    let _ = events.send(MediaEvent::DataAvailable(std::mem::take(&mut pending)));
                }
            }
            _ = &mut stop_rx, if !stopping => {
                stopping = true;
                deadline = Some(Instant::now() + STOP_GRACE);
                request_quit(&mut stdin).await;
            }
            _ = &mut track_ended, if !stopping => {
                stopping = true;
                deadline = Some(Instant::now() + STOP_GRACE);
                request_quit(&mut stdin).await;
            }
            _ = grace_expired(deadline) => {
                warn!("Encoder did not exit within {:?}, killing it", STOP_GRACE);
                let _ = child.start_kill();
                deadline = None;
            }
        }
    }

    if !pending.is_empty() {
        let _ = events.send(MediaEvent::DataAvailable(pending));
    }

    match child.wait().await {
        Ok(status) => debug!("Encoder exited with {}", status),
        Err(e) => warn!("Failed to reap encoder: {}", e),
    }
    recording.store(false, Ordering::SeqCst);

    let source_ended = !stopping;
    if source_ended {
        warn!("Encoder exited without a stop request; treating the source as ended");
        track.stop();
    }

    let _ = events.send(MediaEvent::Stopped {
        mime_type,
        source_ended,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_containers() {
        let capture = FfmpegCapture::new(FfmpegCaptureConfig::default());
        assert!(capture.is_type_supported("video/mp4"));
        assert!(capture.is_type_supported("video/webm;codecs=vp8"));
        assert!(capture.is_type_supported("video/x-matroska;codecs=avc1"));
        assert!(!capture.is_type_supported("video/ogg"));
    }

    #[test]
    fn test_output_args_negotiate_mimetype() {
        let (args, mime) = output_args("video/mp4", 1_000).unwrap();
        assert_eq!(mime, "video/mp4");
        assert!(args.contains(&"frag_keyframe+empty_moov".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));

        let (args, mime) = output_args("video/webm", 1_000).unwrap();
        assert_eq!(mime, "video/webm;codecs=vp8");
        assert!(args.contains(&"libvpx".to_string()));

        assert!(output_args("audio/ogg", 1_000).is_none());
    }

    #[test]
    fn test_test_pattern_input() {
        let capture = FfmpegCapture::new(FfmpegCaptureConfig {
            source: CaptureSource::TestPattern,
            ..Default::default()
        });
        let args = capture.input_args(30);
        assert_eq!(args[1], "lavfi");
        assert_eq!(args[3], "testsrc2=size=1280x720:rate=30");
    }

    #[test]
    fn test_probe_failure_classification() {
        assert_eq!(
            classify_probe_failure(":0.0: Permission denied").kind,
            AcquireErrorKind::NotAllowed
        );
        assert_eq!(
            classify_probe_failure("Cannot open display :9, error 1.").kind,
            AcquireErrorKind::NotFound
        );
        assert_eq!(
            classify_probe_failure("Invalid argument").kind,
            AcquireErrorKind::Other
        );
    }

    #[tokio::test]
    async fn test_track_stop_resolves_ended() {
        let track = FfmpegTrack::new("t".into(), 30);
        assert_eq!(track.state(), TrackState::Live);
        track.stop();
        track.ended().await;
        assert_eq!(track.state(), TrackState::Ended);
    }
}
