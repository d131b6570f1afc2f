//! Encoder worker
//!
//! Shells out to `ffmpeg` or `guacenc` to transform a raw recording into a
//! playable video artifact. Invocation is fire-and-forget: the HTTP handler
//! spawns this and responds immediately, logging the eventual result.

use log::{error, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp4,
    Webm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp4" => Some(OutputFormat::Mp4),
            "webm" => Some(OutputFormat::Webm),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum EncoderError {
    RecordingNotFound(PathBuf),
    SpawnFailed(std::io::Error),
    NonZeroExit(i32),
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::RecordingNotFound(path) => write!(f, "recording not found: {}", path.display()),
            EncoderError::SpawnFailed(e) => write!(f, "failed to spawn encoder process: {}", e),
            EncoderError::NonZeroExit(code) => write!(f, "encoder process exited with status {}", code),
        }
    }
}

impl std::error::Error for EncoderError {}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Transform `<storage_dir>/<record_id>` into `<storage_dir>/../downloads/<record_id>.<format>`
/// using `ffmpeg` for raw VNC/RDP byte streams, or `guacenc` when `guacamole_framed` is set
/// (the recording contains Guacamole-framed instructions rather than a raw video/desktop stream).
pub async fn transform(
    storage_dir: &Path,
    record_id: &str,
    format: OutputFormat,
    guacamole_framed: bool,
) -> Result<PathBuf> {
    let input_path = storage_dir.join(record_id);
    if !input_path.exists() {
        return Err(EncoderError::RecordingNotFound(input_path));
    }

    let downloads_dir = storage_dir
        .parent()
        .map(|p| p.join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"));
    tokio::fs::create_dir_all(&downloads_dir)
        .await
        .map_err(EncoderError::SpawnFailed)?;

    let output_path = downloads_dir.join(format!("{}.{}", record_id, format.extension()));

    let mut command = if guacamole_framed {
        let mut cmd = Command::new("guacenc");
        cmd.arg("-o").arg(&output_path).arg(&input_path);
        cmd
    } else {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-f")
            .arg("rfbsrc")
            .arg("-i")
            .arg(&input_path)
            .arg(&output_path);
        cmd
    };

    info!("encoding {} -> {}", input_path.display(), output_path.display());
    let start = Instant::now();
    let status = command.status().await.map_err(EncoderError::SpawnFailed)?;
    let elapsed = start.elapsed();

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        error!("encode of {} failed after {:?} with status {}", record_id, elapsed, code);
        return Err(EncoderError::NonZeroExit(code));
    }

    info!("encode of {} finished in {:?}", record_id, elapsed);
    Ok(output_path)
}
