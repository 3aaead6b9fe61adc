use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::engine::{TranscodeEngine, TranscodeError};
use super::object_url::{DeliverableMedia, ObjectUrlStore};

const OUTPUT_NAME: &str = "output.mp4";
const OUTPUT_CONTENT_TYPE: &str = "video/mp4";

/// Encoder settings for the re-encode path
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub preset: String,
    pub crf: u8,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            preset: "ultrafast".to_string(),
            crf: 30,
        }
    }
}

/// Turns recorded fragments into a deliverable MP4
#[derive(Clone)]
pub struct Transcoder {
    engine: Arc<dyn TranscodeEngine>,
    urls: ObjectUrlStore,
    settings: TranscodeSettings,
}

impl Transcoder {
    pub fn new(engine: Arc<dyn TranscodeEngine>, urls: ObjectUrlStore, settings: TranscodeSettings) -> Self {
        Self {
            engine,
            urls,
            settings,
        }
    }

    pub fn urls(&self) -> &ObjectUrlStore {
        &self.urls
    }

    /// Assemble `chunks`, run them through the engine and mint a reference to the result
    pub async fn transcode<C>(&self, chunks: &[C], mime_hint: &str) -> Result<DeliverableMedia, TranscodeError>
    where
        C: AsRef<[u8]> + Sync,
    {
        let blob: Vec<u8> = chunks.iter().flat_map(|c| c.as_ref().iter().copied()).collect();
        info!(
            "Transcoding {} fragments ({} bytes, {})",
            chunks.len(),
            blob.len(),
            mime_hint
        );

        let data_url = read_as_data_url(blob, mime_hint.to_string()).await?;
        let payload = fetch_file(&data_url)?;

        self.engine.load().await?;

        let input = format!("input.{}", input_extension(mime_hint));
        self.engine.write_file(&input, &payload).await?;
        self.engine.exec(&self.command(&input, mime_hint)).await?;
        let output = self.engine.read_file(OUTPUT_NAME).await?;

        if output.is_empty() {
            return Err(TranscodeError::Exec("engine produced an empty output".to_string()));
        }

        let data = Arc::new(output);
        let url = self.urls.create_object_url(Arc::clone(&data), OUTPUT_CONTENT_TYPE);
        info!("Transcode complete: {} bytes at {}", data.len(), url);

        Ok(DeliverableMedia {
            url,
            data,
            content_type: OUTPUT_CONTENT_TYPE.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Copy-remux MP4-compatible input, re-encode anything else. Audio is dropped.
    fn command(&self, input: &str, mime_hint: &str) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.to_string()];
        if is_mp4_compatible(mime_hint) {
            args.extend(["-c:v", "copy"].map(String::from));
        } else {
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                self.settings.preset.clone(),
                "-crf".to_string(),
                self.settings.crf.to_string(),
            ]);
        }
        args.extend(["-an", OUTPUT_NAME].map(String::from));
        args
    }
}

/// Whether the video can be remuxed into MP4 without re-encoding
pub fn is_mp4_compatible(mime_type: &str) -> bool {
    let mut parts = mime_type.split(';');
    let container = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    if container == "video/mp4" {
        return true;
    }

    parts
        .filter_map(|param| param.trim().strip_prefix("codecs="))
        .flat_map(|codecs| codecs.trim_matches('"').split(','))
        .map(|codec| codec.trim().to_ascii_lowercase())
        .any(|codec| codec.starts_with("avc1") || codec.starts_with("h264"))
}

fn input_extension(mime_type: &str) -> &'static str {
    let container = mime_type.split(';').next().unwrap_or_default().trim();
    match container {
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        _ => "webm",
    }
}

/// Serialise a blob to a `data:` URL on a blocking worker
pub async fn read_as_data_url(blob: Vec<u8>, mime_type: String) -> Result<String, TranscodeError> {
    if blob.is_empty() {
        return Err(TranscodeError::Read("recorded payload is empty".to_string()));
    }

    tokio::task::spawn_blocking(move || {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&blob);
        format!("data:{};base64,{}", mime_type, encoded)
    })
    .await
    .map_err(|e| TranscodeError::Read(format!("reader task failed: {}", e)))
}

/// Decode a `data:` URL back into bytes
pub fn fetch_file(data_url: &str) -> Result<Vec<u8>, TranscodeError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| TranscodeError::Read("not a data URL".to_string()))?;
    let (_, encoded) = rest
        .split_once(";base64,")
        .ok_or_else(|| TranscodeError::Read("data URL is not base64 encoded".to_string()))?;

    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| TranscodeError::Read(format!("invalid data URL payload: {}", e)))
}
