//! Audio decoding
//!
//! Decoding is a collaborator: the session only needs "give me PCM for this
//! source". The default implementation shells out to FFmpeg like the
//! container writer does and asks it for raw `f32le` in the graph format.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::buffer::{self, AudioFormat, PcmBuffer};
use super::preload::PreloadCache;
use super::{AudioError, AudioSource};

/// Decodes sources into PCM and converts between formats
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    /// Decode the whole source, preferably already in `format`
    async fn decode(&self, source: &AudioSource, format: AudioFormat) -> Result<PcmBuffer, AudioError>;

    /// Convert a buffer to `format`
    fn convert(&self, buffer: &PcmBuffer, format: AudioFormat) -> Result<PcmBuffer, AudioError> {
        buffer::convert(buffer, format)
    }
}

/// FFmpeg-backed decoder with a download cache for remote sources
pub struct FfmpegAudioDecoder {
    cache: PreloadCache,
}

impl FfmpegAudioDecoder {
    pub fn new(cache: PreloadCache) -> Self {
        Self { cache }
    }

    async fn decode_file(path: &Path, source: &AudioSource, format: AudioFormat) -> Result<PcmBuffer, AudioError> {
        let output = Command::new("ffmpeg")
            .args([
                "-v".to_string(),
                "error".to_string(),
                "-i".to_string(),
                path.to_string_lossy().to_string(),
                "-f".to_string(),
                "f32le".to_string(),
                "-acodec".to_string(),
                "pcm_f32le".to_string(),
                "-ac".to_string(),
                format.channels.to_string(),
                "-ar".to_string(),
                format.sample_rate.to_string(),
                "-".to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AudioError::Decode {
                source_id: source.to_string(),
                message: format!("Failed to start FFmpeg: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::Decode {
                source_id: source.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(PcmBuffer::new(format, samples_from_le_bytes(&output.stdout)))
    }
}

impl Default for FfmpegAudioDecoder {
    fn default() -> Self {
        Self::new(PreloadCache::default())
    }
}

#[async_trait]
impl AudioDecoder for FfmpegAudioDecoder {
    async fn decode(&self, source: &AudioSource, format: AudioFormat) -> Result<PcmBuffer, AudioError> {
        let path = self.cache.resolve(source).await?;
        tracing::debug!("Decoding {} from {:?}", source, path);
        let buffer = Self::decode_file(&path, source, format).await?;
        if buffer.is_empty() {
            return Err(AudioError::Decode {
                source_id: source.to_string(),
                message: "no audio samples decoded".to_string(),
            });
        }
        Ok(buffer)
    }
}

/// Interpret raw bytes as little-endian f32 samples, ignoring a trailing partial sample
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_from_le_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        bytes.push(0xff);
        assert_eq!(samples_from_le_bytes(&bytes), vec![0.25, -1.0]);
    }

    #[test]
    fn test_pcm_bytes_round_trip_layout() {
        let buf = PcmBuffer::new(AudioFormat::new(10, 1), vec![0.5, 0.125]);
        assert_eq!(samples_from_le_bytes(&buf.to_le_bytes()), vec![0.5, 0.125]);
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = FfmpegAudioDecoder::new(PreloadCache::new(dir.path()));
        let source = AudioSource::new(dir.path().join("missing.wav").to_string_lossy().to_string());
        let result = decoder.decode(&source, AudioFormat::default()).await;
        assert!(result.is_err());
    }
}
