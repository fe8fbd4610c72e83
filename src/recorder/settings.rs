//! Render settings
//!
//! Immutable per-session configuration: frame geometry, timing, output
//! location and live destinations. Output file names are fixed when the
//! settings are built, so every session built from one `RenderSettings`
//! value writes to the same file.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::audio::buffer::AudioFormat;

/// Default name used for output files
pub const DEFAULT_NAME: &str = "framecast_video";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to create output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A live streaming destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDestinationSettings {
    /// Connection URI, e.g. `rtmp://live.example.com/app`
    pub uri: String,

    /// Stream key published under the connection
    pub stream_key: String,

    /// H.264 profile override (defaults to main)
    #[serde(default)]
    pub profile_level: Option<String>,

    /// Bitrate override in bits per second
    #[serde(default)]
    pub bit_rate: Option<u32>,
}

impl LiveDestinationSettings {
    pub fn new(uri: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            stream_key: stream_key.into(),
            profile_level: None,
            bit_rate: None,
        }
    }

    /// Full publish URL (`uri/stream_key`)
    pub fn publish_url(&self) -> String {
        format!("{}/{}", self.uri.trim_end_matches('/'), self.stream_key)
    }
}

/// Serialized form of [`RenderSettings`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default = "default_display_scale")]
    pub display_scale: f64,
    /// Capture duration in milliseconds; unbounded if absent
    #[serde(default)]
    pub capture_duration_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub save_video_file: bool,
    #[serde(default)]
    pub videos_dir: Option<PathBuf>,
    #[serde(default)]
    pub livestreams: Vec<LiveDestinationSettings>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_display_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Settings for one recording session
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub display_scale: f64,
    pub capture_duration: Option<Duration>,
    pub save_video_file: bool,
    pub livestreams: Vec<LiveDestinationSettings>,
    pub audio_format: AudioFormat,
    pub file_extension: String,
    pub videos_dir: PathBuf,
    video_filename: String,
}

impl RenderSettings {
    /// Create settings with defaults for everything but geometry and rate
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        let name = name.into();
        let video_filename = unique_filename(&name);
        Self {
            name,
            width,
            height,
            fps,
            display_scale: 1.0,
            capture_duration: None,
            save_video_file: true,
            livestreams: Vec::new(),
            audio_format: AudioFormat::default(),
            file_extension: "mp4".to_string(),
            videos_dir: default_videos_dir(),
            video_filename,
        }
    }

    pub fn with_display_scale(mut self, scale: f64) -> Self {
        self.display_scale = scale;
        self
    }

    pub fn with_capture_duration(mut self, duration: Duration) -> Self {
        self.capture_duration = Some(duration);
        self
    }

    pub fn with_save_video_file(mut self, save: bool) -> Self {
        self.save_video_file = save;
        self
    }

    pub fn with_livestream(mut self, destination: LiveDestinationSettings) -> Self {
        self.livestreams.push(destination);
        self
    }

    pub fn with_videos_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.videos_dir = dir.into();
        self
    }

    /// Build settings from a parsed config
    pub fn from_config(config: RenderConfig) -> Result<Self, ConfigError> {
        let mut settings = Self::new(config.name, config.width, config.height, config.fps)
            .with_display_scale(config.display_scale)
            .with_save_video_file(config.save_video_file);
        settings.capture_duration = config.capture_duration_ms.map(Duration::from_millis);
        settings.livestreams = config.livestreams;
        if let Some(dir) = config.videos_dir {
            settings.videos_dir = dir;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = serde_json::from_str(json)?;
        Self::from_config(config)
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded render settings from {:?}", path);
        Self::from_json_str(&content)
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::Invalid {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.width == 0 || self.height == 0 {
            return Err(invalid("width/height", "dimensions must be non-zero"));
        }
        if self.fps == 0 {
            return Err(invalid("fps", "frame rate must be non-zero"));
        }
        if !(self.display_scale > 0.0) || !self.display_scale.is_finite() {
            return Err(invalid("displayScale", "scale must be a positive number"));
        }
        if matches!(self.capture_duration, Some(d) if d.is_zero()) {
            return Err(invalid("captureDurationMs", "duration must be positive"));
        }
        for destination in &self.livestreams {
            if destination.uri.is_empty() {
                return Err(invalid("livestreams.uri", "connection URI is empty"));
            }
        }
        Ok(())
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Frame budget for the configured capture duration, `None` if unbounded
    ///
    /// `floor(duration * fps)`, computed in integer nanoseconds.
    pub fn total_frames(&self) -> Option<u64> {
        self.capture_duration
            .map(|d| (d.as_nanos() * self.fps as u128 / 1_000_000_000) as u64)
    }

    /// File name without directory or extension
    pub fn video_filename(&self) -> &str {
        &self.video_filename
    }

    /// Directory for in-progress files
    pub fn temp_dir(&self) -> PathBuf {
        self.videos_dir.join(".tmp")
    }

    /// Directory for finished files of this name
    pub fn video_dir(&self) -> PathBuf {
        self.videos_dir.join(sanitize(&self.name))
    }

    /// Final location of the recorded file
    pub fn output_path(&self) -> PathBuf {
        self.video_dir()
            .join(&self.video_filename)
            .with_extension(&self.file_extension)
    }

    /// Location the container writer writes to before finalize
    pub fn temp_output_path(&self) -> PathBuf {
        self.temp_dir()
            .join(&self.video_filename)
            .with_extension(&self.file_extension)
    }

    /// Create the output directory tree
    pub fn prepare_directories(&self) -> Result<(), ConfigError> {
        for dir in [self.temp_dir(), self.video_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Default H.264 bitrate for this resolution and rate
    pub fn default_bitrate(&self) -> u32 {
        let pixels = self.width as u64 * self.height as u64;
        let high_rate = self.fps >= 60;
        match pixels {
            0..=409_920 => 4_000_000,
            409_921..=921_600 => {
                if high_rate {
                    6_000_000
                } else {
                    4_000_000
                }
            }
            921_601..=2_073_600 => {
                if high_rate {
                    12_000_000
                } else {
                    10_000_000
                }
            }
            2_073_601..=3_686_400 => {
                if high_rate {
                    24_000_000
                } else {
                    15_000_000
                }
            }
            3_686_401..=8_294_400 => {
                if high_rate {
                    35_000_000
                } else {
                    30_000_000
                }
            }
            _ => 30_000_000,
        }
    }

    /// Keyframe every two seconds, capped at 60 frames
    pub fn default_keyframe_interval(&self) -> u32 {
        (self.fps * 2).min(60)
    }
}

/// `name_YYYYmmdd_HHMMSS_xxxxxxxx`
///
/// The random suffix keeps two sessions started within the same second from
/// colliding on disk.
fn unique_filename(name: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", sanitize(name), timestamp, &suffix[..8])
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        cleaned
    }
}

fn default_videos_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("framecast")
        .join("videos")
}
