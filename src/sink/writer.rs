//! Container writer collaborator
//!
//! The session never encodes anything itself. It opens one
//! [`ContainerWriter`] per session through a [`ContainerBackend`] and the
//! sink adapters append to its tracks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::sample::PixelBuffer;
use crate::audio::PcmBuffer;
use crate::recorder::settings::RenderSettings;
use crate::utils::time::MediaTime;

/// Container writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Failed to start encoder process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Writer is not accepting samples (status: {0})")]
    NotWriting(WriterStatus),

    #[error("{0} input is not ready for more data")]
    NotReady(TrackKind),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

/// Lifecycle of a container writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
}

impl std::fmt::Display for WriterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Writing => "writing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Track inputs of the output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// An open output container
///
/// Each track is appended to by exactly one sink adapter, so the
/// ready-then-append sequence only races with itself per track.
#[async_trait]
pub trait ContainerWriter: Send + Sync {
    fn status(&self) -> WriterStatus;

    /// Backpressure signal for one track input
    fn is_ready_for_more(&self, track: TrackKind) -> bool;

    fn append_video(&self, frame: &PixelBuffer, time: MediaTime) -> Result<(), WriterError>;

    fn append_audio(&self, buffer: &PcmBuffer, time: MediaTime) -> Result<(), WriterError>;

    /// Flush and close the container. Appends are rejected afterwards.
    async fn finish_writing(&self) -> Result<(), WriterError>;
}

/// Creates writers and post-processes finished files
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Open a writer for `path`. Failure is fatal to starting a session.
    fn open_writer(
        &self,
        path: &Path,
        settings: &RenderSettings,
    ) -> Result<Arc<dyn ContainerWriter>, WriterError>;

    /// Copy the first `duration` of `source` into `destination`
    async fn trim(
        &self,
        source: &Path,
        destination: &Path,
        duration: Duration,
    ) -> Result<(), WriterError>;
}

/// Move a finished file into place, replacing any existing file
pub async fn move_file(source: &Path, destination: &Path) -> Result<PathBuf, WriterError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        tokio::fs::remove_file(destination).await?;
    }
    if tokio::fs::rename(source, destination).await.is_err() {
        // Cross-device moves need a copy
        tokio::fs::copy(source, destination).await?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join(".tmp/a.mp4");
        let destination = dir.path().join("name/a.mp4");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"new").unwrap();
        std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
        std::fs::write(&destination, b"old").unwrap();

        let moved = move_file(&source, &destination).await.unwrap();
        assert_eq!(moved, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), b"new");
        assert!(!source.exists());
    }

    #[test]
    fn test_error_messages() {
        let err = WriterError::NotReady(TrackKind::Audio);
        assert_eq!(err.to_string(), "audio input is not ready for more data");
        let err = WriterError::NotWriting(WriterStatus::Completed);
        assert!(err.to_string().contains("completed"));
    }
}
