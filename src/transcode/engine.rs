use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from reading the recorded payload or running the transcode
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to read recorded payload: {0}")]
    Read(String),

    #[error("Failed to load transcoding engine: {0}")]
    Load(String),

    #[error("Transcode command failed: {0}")]
    Exec(String),

    #[error("Transcoding engine file error: {0}")]
    File(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Pipeline stage, used as a log field
    pub fn stage(&self) -> &'static str {
        match self {
            TranscodeError::Read(_) => "read",
            TranscodeError::Load(_) => "load",
            TranscodeError::Exec(_) | TranscodeError::File(_) | TranscodeError::Io(_) => {
                "transcode"
            }
        }
    }
}

/// Contract of an external transcoding engine with its own file namespace
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Prepare the engine and reset its file namespace
    async fn load(&self) -> Result<(), TranscodeError>;

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), TranscodeError>;

    /// Run one command, e.g. `["-i", "input.webm", ..., "output.mp4"]`
    async fn exec(&self, args: &[String]) -> Result<(), TranscodeError>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, TranscodeError>;
}

/// [`TranscodeEngine`] backed by the `ffmpeg` binary and a temporary directory
pub struct FfmpegEngine {
    binary: String,
    workdir: Mutex<Option<TempDir>>,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            workdir: Mutex::new(None),
        }
    }

    fn workdir(&self) -> Result<PathBuf, TranscodeError> {
        self.workdir
            .lock()
            .map_err(|_| TranscodeError::Load("engine state poisoned".to_string()))?
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| TranscodeError::Load("engine not loaded".to_string()))
    }

    /// Resolve a name inside the working directory, refusing anything that escapes it
    fn path_for(&self, name: &str) -> Result<PathBuf, TranscodeError> {
        let relative = Path::new(name);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(TranscodeError::File(format!("invalid file name: {}", name)));
        }
        Ok(self.workdir()?.join(relative))
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn load(&self) -> Result<(), TranscodeError> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TranscodeError::Load(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(TranscodeError::Load(format!(
                "{} -version exited with {}",
                self.binary, output.status
            )));
        }

        let dir = tempfile::Builder::new().prefix("baseline-transcode-").tempdir()?;
        debug!("Transcode workspace at {:?}", dir.path());

        let mut workdir = self
            .workdir
            .lock()
            .map_err(|_| TranscodeError::Load("engine state poisoned".to_string()))?;
        // Replacing the previous directory deletes it.
        *workdir = Some(dir);

        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), TranscodeError> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, data).await?;
        debug!("Wrote {} bytes to {}", data.len(), name);
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<(), TranscodeError> {
        let workdir = self.workdir()?;
        info!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::Exec(format!("failed to start {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::Exec(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, TranscodeError> {
        let path = self.path_for(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| TranscodeError::File(format!("failed to read {}: {}", name, e)))
    }
}
