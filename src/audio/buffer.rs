//! PCM buffers and format conversion

use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AudioError;

/// Sample rate every graph and writer uses unless configured otherwise
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Input frames per resampler pass
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Interleaved f32 PCM format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames in `seconds` of audio
    pub fn frames_for_secs(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64).round() as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, 2)
    }
}

/// A block of interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub format: AudioFormat,
    pub samples: Arc<[f32]>,
}

impl PcmBuffer {
    pub fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
        Self {
            format,
            samples: samples.into(),
        }
    }

    /// A buffer of `frames` frames of silence
    pub fn silence(format: AudioFormat, frames: usize) -> Self {
        Self::new(format, vec![0.0; frames * format.channels as usize])
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        match self.format.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Copy of `count` frames starting at frame `start`, clamped to the end
    pub fn slice_frames(&self, start: usize, count: usize) -> PcmBuffer {
        let channels = self.format.channels as usize;
        let end = (start + count).min(self.frames());
        let start = start.min(end);
        PcmBuffer::new(
            self.format,
            self.samples[start * channels..end * channels].to_vec(),
        )
    }

    /// Raw little-endian bytes, the layout ffmpeg reads as `f32le`
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Convert a buffer to `target`, remapping channels then resampling
pub fn convert(buffer: &PcmBuffer, target: AudioFormat) -> Result<PcmBuffer, AudioError> {
    if buffer.format == target {
        return Ok(buffer.clone());
    }
    if buffer.format.channels == 0 || target.channels == 0 {
        return Err(AudioError::Conversion(format!(
            "cannot convert {:?} to {:?}",
            buffer.format, target
        )));
    }
    if buffer.format.sample_rate == 0 || target.sample_rate == 0 {
        return Err(AudioError::Conversion("sample rate must be non-zero".to_string()));
    }

    let remapped = remap_channels(buffer, target.channels);
    resample(&remapped, target.sample_rate)
}

fn remap_channels(buffer: &PcmBuffer, channels: u16) -> PcmBuffer {
    let from = buffer.format.channels as usize;
    let to = channels as usize;
    if from == to {
        return buffer.clone();
    }

    let frames = buffer.frames();
    let mut out = Vec::with_capacity(frames * to);
    for frame in buffer.samples.chunks_exact(from) {
        if to == 1 {
            // Downmix to mono by averaging
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    PcmBuffer::new(AudioFormat::new(buffer.format.sample_rate, channels), out)
}

fn resample(buffer: &PcmBuffer, sample_rate: u32) -> Result<PcmBuffer, AudioError> {
    let source_rate = buffer.format.sample_rate;
    if source_rate == sample_rate {
        return Ok(buffer.clone());
    }

    let channels = buffer.format.channels as usize;
    let out_frames =
        (buffer.frames() as u64 * sample_rate as u64 / source_rate as u64) as usize;

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        sample_rate as usize,
        RESAMPLE_CHUNK_FRAMES,
        2,
        channels,
    )
    .map_err(|e| AudioError::Conversion(format!("Resampler init failed: {}", e)))?;
    let delay = resampler.output_delay();

    let planes: Vec<Vec<f32>> = (0..channels)
        .map(|ch| buffer.samples.iter().skip(ch).step_by(channels).copied().collect())
        .collect();
    let mut resampled: Vec<Vec<f32>> = vec![Vec::with_capacity(out_frames + delay); channels];

    // Keep feeding (zero-padded past the end) until the delayed output covers the buffer
    let mut position = 0;
    while resampled[0].len() < out_frames + delay {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| {
                let start = position.min(plane.len());
                let end = (position + needed).min(plane.len());
                let mut frames = plane[start..end].to_vec();
                frames.resize(needed, 0.0);
                frames
            })
            .collect();
        let output = resampler
            .process(&chunk, None)
            .map_err(|e| AudioError::Conversion(format!("Resampling failed: {}", e)))?;
        for (plane, out) in resampled.iter_mut().zip(output) {
            plane.extend(out);
        }
        position += needed;
    }

    let mut out = Vec::with_capacity(out_frames * channels);
    for frame in delay..delay + out_frames {
        for plane in &resampled {
            out.push(plane[frame]);
        }
    }
    Ok(PcmBuffer::new(AudioFormat::new(sample_rate, buffer.format.channels), out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_clamps_to_end() {
        let buf = PcmBuffer::new(AudioFormat::new(10, 2), (0..20).map(|i| i as f32).collect());
        assert_eq!(buf.frames(), 10);

        let tail = buf.slice_frames(8, 5);
        assert_eq!(tail.frames(), 2);
        assert_eq!(&tail.samples[..], &[16.0, 17.0, 18.0, 19.0]);

        assert!(buf.slice_frames(12, 5).is_empty());
    }

    #[test]
    fn test_mono_to_stereo() {
        let mono = PcmBuffer::new(AudioFormat::new(100, 1), vec![0.5, -0.5]);
        let stereo = convert(&mono, AudioFormat::new(100, 2)).unwrap();
        assert_eq!(&stereo.samples[..], &[0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let stereo = PcmBuffer::new(AudioFormat::new(100, 2), vec![1.0, 0.0, 0.5, 0.5]);
        let mono = convert(&stereo, AudioFormat::new(100, 1)).unwrap();
        assert_eq!(&mono.samples[..], &[0.5, 0.5]);
    }

    #[test]
    fn test_resample_changes_length() {
        let buf = PcmBuffer::silence(AudioFormat::new(48_000, 2), 48_000);
        let out = convert(&buf, AudioFormat::new(44_100, 2)).unwrap();
        assert_eq!(out.frames(), 44_100);
        assert_eq!(out.format, AudioFormat::new(44_100, 2));
    }

    #[test]
    fn test_resample_is_delay_compensated() {
        // A constant signal stays constant away from the edges
        let buf = PcmBuffer::new(AudioFormat::new(8_000, 1), vec![0.5; 4_000]);
        let out = convert(&buf, AudioFormat::new(16_000, 2)).unwrap();
        assert_eq!(out.frames(), 8_000);
        let middle = &out.samples[8_000..8_002];
        assert!(middle.iter().all(|s| (s - 0.5).abs() < 0.01), "{:?}", middle);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let buf = PcmBuffer::new(AudioFormat::new(100, 1), vec![0.0]);
        assert!(convert(&buf, AudioFormat::new(100, 0)).is_err());
    }
}
