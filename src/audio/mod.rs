//! Audio playback graph, decoding and format conversion
//!
//! Sources are identified by an [`AudioSource`] (a path or URL), decoded once
//! into a [`PcmBuffer`], and played through player nodes on an owned
//! [`AudioGraph`]. Each node's tapped output is what gets recorded.

pub mod buffer;
pub mod decoder;
pub mod graph;
pub mod preload;

pub use buffer::{AudioFormat, PcmBuffer};
pub use decoder::{AudioDecoder, FfmpegAudioDecoder};
pub use graph::{AudioGraph, PlayerState, Tap};
pub use preload::PreloadCache;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Audio errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to decode {source_id}: {message}")]
    Decode { source_id: String, message: String },

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("No audio loaded for {0}")]
    NotLoaded(AudioSource),
}

/// Identifier of an audio source: a local path, `file://` URL or `http(s)://` URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioSource(String);

impl AudioSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the source has to be fetched over the network
    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Local filesystem path for non-remote sources
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.is_remote() {
            return None;
        }
        match self.0.strip_prefix("file://") {
            Some(rest) => {
                let decoded = urlencoding::decode(rest)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| rest.to_string());
                Some(PathBuf::from(decoded))
            }
            None => Some(PathBuf::from(&self.0)),
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AudioSource {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AudioSource {
    fn from(s: String) -> Self {
        Self(s)
    }
}
