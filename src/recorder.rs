//! Session recorder
//!
//! Captures the raw, post-handshake byte stream of one session into a single
//! append-only file at `<storage_dir>/<session_id>`. No framing, no
//! compression, no metadata sidecar — the encoder worker is expected to
//! recover timing and protocol structure from the stream shape itself.

use log::warn;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum StorageError {
    DirectoryUnavailable(std::io::Error),
    FileUnavailable(std::io::Error),
    WriteFailed(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DirectoryUnavailable(e) => write!(f, "storage directory unavailable: {}", e),
            StorageError::FileUnavailable(e) => write!(f, "recording file unavailable: {}", e),
            StorageError::WriteFailed(e) => write!(f, "recording write failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Append-only write sink for one session's recording.
///
/// Shared between the forward and reverse half-duplex copy tasks via `Arc`;
/// the internal mutex serializes writes so no chunk interleaves mid-`write_all`.
pub struct SessionRecorder {
    path: PathBuf,
    file: Mutex<Option<File>>,
    closed: AtomicBool,
}

impl SessionRecorder {
    /// Create the storage directory (recursively, mode 0777 on Unix) if
    /// absent, then open `<storage_dir>/<session_id>` for exclusive write.
    pub async fn open(storage_dir: &Path, session_id: &str) -> Result<Self> {
        ensure_dir(storage_dir).await.map_err(StorageError::DirectoryUnavailable)?;

        let path = storage_dir.join(session_id);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(StorageError::FileUnavailable)?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` to the recording. Returns the number of bytes written.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut guard = self.file.lock().await;
        let file = match guard.as_mut() {
            Some(f) => f,
            None => return Ok(0), // already closed; a strict-mode caller should check this
        };
        file.write_all(bytes).await.map_err(StorageError::WriteFailed)?;
        Ok(bytes.len())
    }

    /// Flush and close the underlying file. Idempotent — repeated calls are
    /// no-ops after the first.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await.map_err(StorageError::WriteFailed)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).await.or_else(|e| {
        // Best-effort: directories we don't own may refuse chmod; the create
        // above already succeeded, which is what matters for correctness.
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            warn!("could not relax permissions on {}: {}", dir.display(), e);
            Ok(())
        } else {
            Err(e)
        }
    })
}

#[cfg(not(unix))]
async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_in_missing_directory() {
        let dir = tempdir().unwrap();
        let storage_dir = dir.path().join("recordings");
        let recorder = SessionRecorder::open(&storage_dir, "session-1").await.unwrap();
        assert!(recorder.path().exists());
    }

    #[tokio::test]
    async fn open_fails_on_duplicate_session_id() {
        let dir = tempdir().unwrap();
        let _first = SessionRecorder::open(dir.path(), "dup").await.unwrap();
        let second = SessionRecorder::open(dir.path(), "dup").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn write_appends_bytes_in_order() {
        let dir = tempdir().unwrap();
        let recorder = SessionRecorder::open(dir.path(), "session-2").await.unwrap();
        recorder.write(b"HELLO").await.unwrap();
        recorder.write(b"WORLD").await.unwrap();
        recorder.close().await.unwrap();

        let contents = std::fs::read(recorder.path()).unwrap();
        assert_eq!(contents, b"HELLOWORLD");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let recorder = SessionRecorder::open(dir.path(), "session-3").await.unwrap();
        recorder.close().await.unwrap();
        recorder.close().await.unwrap();
    }

    #[tokio::test]
    async fn write_after_close_is_a_harmless_noop() {
        let dir = tempdir().unwrap();
        let recorder = SessionRecorder::open(dir.path(), "session-4").await.unwrap();
        recorder.close().await.unwrap();
        let n = recorder.write(b"late").await.unwrap();
        assert_eq!(n, 0);
    }
}
