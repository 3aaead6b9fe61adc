use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::capture::{CaptureConstraints, CaptureSource, FfmpegCaptureConfig};
use crate::recorder::{TimelineConfig, DEFAULT_VIDEO_BITS_PER_SECOND};
use crate::transcode::TranscodeSettings;

/// Environment variables override file values, e.g. `BASELINE_RECORDER__SERVICE__HTTP__PORT=9000`
const ENV_PREFIX: &str = "BASELINE_RECORDER";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Feature the recording demonstrates; names the downloaded file
    #[serde(default = "default_feature_id")]
    pub feature_id: String,
    #[serde(default = "default_one_second")]
    pub video_length: f64,
    #[serde(default = "default_one_second")]
    pub transition_duration: f64,
    #[serde(default = "default_one_second")]
    pub video_delay: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            feature_id: default_feature_id(),
            video_length: default_one_second(),
            transition_duration: default_one_second(),
            video_delay: default_one_second(),
        }
    }
}

impl RecordingConfig {
    pub fn timeline(&self) -> TimelineConfig {
        TimelineConfig {
            video_length: self.video_length,
            transition_duration: self.transition_duration,
            video_delay: self.video_delay,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub source: CaptureSource,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_true")]
    pub prefer_current_tab: bool,
    #[serde(default = "default_video_bits_per_second")]
    pub video_bits_per_second: u64,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSource::default(),
            display: None,
            frame_rate: default_frame_rate(),
            prefer_current_tab: true,
            video_bits_per_second: default_video_bits_per_second(),
            ffmpeg_path: default_ffmpeg(),
        }
    }
}

impl CaptureConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            frame_rate_ideal: self.frame_rate,
            frame_rate_max: self.frame_rate,
            prefer_current_tab: self.prefer_current_tab,
        }
    }

    pub fn ffmpeg(&self) -> FfmpegCaptureConfig {
        FfmpegCaptureConfig {
            binary: self.ffmpeg_path.clone(),
            source: self.source,
            display: self.display.clone(),
            timeslice: Duration::from_secs(1),
            ..FfmpegCaptureConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            preset: default_preset(),
            crf: default_crf(),
        }
    }
}

impl TranscodeConfig {
    pub fn settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            preset: self.preset.clone(),
            crf: self.crf,
        }
    }
}

fn default_service_name() -> String {
    "baseline-recorder".to_string()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_feature_id() -> String {
    "anchor-positioning".to_string()
}

fn default_one_second() -> f64 {
    1.0
}

fn default_frame_rate() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_video_bits_per_second() -> u64 {
    DEFAULT_VIDEO_BITS_PER_SECOND
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_crf() -> u8 {
    30
}

impl Config {
    /// Load from an optional file at `path` (any extension the `config` crate knows)
    /// layered under `BASELINE_RECORDER__*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("invalid configuration")
    }
}
