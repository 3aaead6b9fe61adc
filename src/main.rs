use anyhow::{bail, Context, Result};
use baseline_recorder::capture::FfmpegCapture;
use baseline_recorder::transcode::{download_file_name, TranscodeSettings};
use baseline_recorder::{
    create_router, AppState, CaptureManager, Config, FfmpegEngine, ObjectUrlStore,
    RecordingStatus, ScreenRecorder, TracingBridge, Transcoder,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "baseline-recorder", version, about = "Record a widget demo as an MP4")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/baseline-recorder")]
    config: String,

    /// Seconds the widget is visible in the recording
    #[arg(long)]
    video_length: Option<f64>,

    /// Seconds per UI transition
    #[arg(long)]
    transition_duration: Option<f64>,

    /// Seconds to wait after stopping
    #[arg(long)]
    video_delay: Option<f64>,

    /// Feature the recording demonstrates
    #[arg(long)]
    feature_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one recording and write the MP4
    Record {
        /// Output path; defaults to the download name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Serve the HTTP control surface
    Serve,
}

fn build_recorder(cfg: &Config) -> ScreenRecorder {
    let backend = Arc::new(FfmpegCapture::new(cfg.capture.ffmpeg()));
    let capture = CaptureManager::new(backend, cfg.capture.constraints());

    let engine = Arc::new(FfmpegEngine::new(cfg.transcode.ffmpeg_path.clone()));
    let settings: TranscodeSettings = cfg.transcode.settings();
    let transcoder = Transcoder::new(engine, ObjectUrlStore::new(cfg.service.name.clone()), settings);

    ScreenRecorder::with_bitrate(
        cfg.recording.timeline(),
        capture,
        transcoder,
        Arc::new(TracingBridge),
        cfg.capture.video_bits_per_second,
    )
}

async fn record(cfg: &Config, output: Option<PathBuf>) -> Result<()> {
    let recorder = Arc::new(build_recorder(cfg));

    let run = {
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move { recorder.start().await })
    };

    let ctrl_c = {
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping recording");
                recorder.stop();
            }
        })
    };

    let status = run.await.context("recording task failed")?;
    info!("Timeline ended with status {}", status);

    let snapshot = recorder.wait_until_settled().await;
    ctrl_c.abort();

    if snapshot.status != RecordingStatus::Finished {
        bail!("recording ended with status {}", snapshot.status);
    }

    let Some(media) = recorder.deliverable() else {
        bail!("recording finished without a video");
    };

    let path = output.unwrap_or_else(|| PathBuf::from(download_file_name(&cfg.recording.feature_id)));
    tokio::fs::write(&path, media.data.as_slice())
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("Wrote {} bytes to {}", media.len(), path.display());
    recorder.dispose();
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let recorder = Arc::new(build_recorder(cfg));
    let state = AppState::new(Arc::clone(&recorder), cfg.recording.feature_id.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    recorder.dispose();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("baseline_recorder=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;

    if let Some(value) = cli.video_length {
        cfg.recording.video_length = value;
    }
    if let Some(value) = cli.transition_duration {
        cfg.recording.transition_duration = value;
    }
    if let Some(value) = cli.video_delay {
        cfg.recording.video_delay = value;
    }
    if let Some(value) = cli.feature_id {
        cfg.recording.feature_id = value;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Timeline: {:?}", cfg.recording.timeline());

    let result = match cli.command {
        Command::Record { output } => record(&cfg, output).await,
        Command::Serve => serve(&cfg).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
