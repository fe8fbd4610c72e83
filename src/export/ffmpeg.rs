//! FFmpeg-backed container writer
//!
//! Video frames are piped as raw RGBA into an ffmpeg encoder running on its
//! own thread. Audio is mixed onto a sample-addressed PCM timeline in a
//! scratch file and muxed with the encoded video when writing finishes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::audio::buffer::{self, AudioFormat, PcmBuffer};
use crate::recorder::settings::RenderSettings;
use crate::sink::sample::PixelBuffer;
use crate::sink::writer::{ContainerBackend, ContainerWriter, TrackKind, WriterError, WriterStatus};
use crate::utils::time::MediaTime;

/// Frames queued for the encoder before the video input reports not ready
pub const VIDEO_QUEUE_CAPACITY: usize = 8;

/// Longest gap (in frames) filled by repeating the previous frame
const MAX_GAP_FRAMES: u64 = 600;

/// Opens [`FfmpegContainerWriter`]s and trims finished files
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: String,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }

    /// Use a specific ffmpeg binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for FfmpegBackend {
    fn open_writer(
        &self,
        path: &Path,
        settings: &RenderSettings,
    ) -> Result<Arc<dyn ContainerWriter>, WriterError> {
        let writer = FfmpegContainerWriter::open(&self.program, path, settings)?;
        Ok(Arc::new(writer))
    }

    async fn trim(
        &self,
        source: &Path,
        destination: &Path,
        duration: Duration,
    ) -> Result<(), WriterError> {
        let output = tokio::process::Command::new(&self.program)
            .args(trim_args(source, destination, duration))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(WriterError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WriterError::Ffmpeg(format!("Trim failed: {}", stderr.trim())));
        }
        tracing::info!("Trimmed {:?} to {:.3}s", destination, duration.as_secs_f64());
        Ok(())
    }
}

fn trim_args(source: &Path, destination: &Path, duration: Duration) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-t".to_string(),
        format!("{:.3}", duration.as_secs_f64()),
        "-c".to_string(),
        "copy".to_string(),
        destination.to_string_lossy().to_string(),
    ]
}

fn encoder_args(settings: &RenderSettings, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-b:v".to_string(),
        settings.default_bitrate().to_string(),
        "-g".to_string(),
        settings.default_keyframe_interval().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

fn mux_args(video: &Path, audio: &Path, format: AudioFormat, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "-ac".to_string(),
        format.channels.to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-af".to_string(),
        "apad".to_string(),
        "-shortest".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Video track state owned by the appending side
struct VideoTrack {
    sender: Sender<Arc<[u8]>>,
    thread: std::thread::JoinHandle<Result<u64, WriterError>>,
    next_frame: u64,
    last: Option<Arc<[u8]>>,
}

impl VideoTrack {
    fn send(&self, frame: Arc<[u8]>, queued: &AtomicUsize) -> Result<(), WriterError> {
        queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(frame).map_err(|_| {
            queued.fetch_sub(1, Ordering::SeqCst);
            WriterError::Ffmpeg("Encoder thread has exited".to_string())
        })
    }
}

fn run_encoder(
    mut child: Child,
    mut stdin: ChildStdin,
    frames: Receiver<Arc<[u8]>>,
    queued: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
) -> Result<u64, WriterError> {
    let mut written = 0u64;
    let mut write_error = None;
    for frame in frames {
        queued.fetch_sub(1, Ordering::SeqCst);
        if write_error.is_some() {
            continue;
        }
        match stdin.write_all(&frame) {
            Ok(()) => written += 1,
            Err(e) => {
                broken.store(true, Ordering::SeqCst);
                write_error = Some(e);
            }
        }
    }

    // Close stdin to signal EOF to FFmpeg
    drop(stdin);
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WriterError::Ffmpeg(format!("Encoder exited with error: {}", stderr.trim())));
    }
    if let Some(e) = write_error {
        return Err(WriterError::Io(e));
    }
    Ok(written)
}

/// Sample-addressed PCM timeline, mixed additively
pub struct AudioTimeline {
    format: AudioFormat,
    file: NamedTempFile,
    frames: u64,
}

impl AudioTimeline {
    pub fn new(format: AudioFormat, dir: &Path) -> Result<Self, WriterError> {
        Ok(Self {
            format,
            file: NamedTempFile::new_in(dir)?,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Frames covered by the timeline so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Add `buffer` onto the timeline starting at `time`
    pub fn mix(&mut self, buffer: &PcmBuffer, time: MediaTime) -> Result<(), WriterError> {
        let buffer = buffer::convert(buffer, self.format)
            .map_err(|e| WriterError::Ffmpeg(e.to_string()))?;
        let start = time.rescale(self.format.sample_rate).value;
        if start < 0 || buffer.is_empty() {
            return Ok(());
        }

        let bytes_per_frame = self.format.channels as u64 * 4;
        let offset = start as u64 * bytes_per_frame;
        let file = self.file.as_file_mut();

        let mut existing = vec![0u8; buffer.samples.len() * 4];
        let stored_end = self.frames * bytes_per_frame;
        if offset < stored_end {
            let overlap = ((stored_end - offset) as usize).min(existing.len());
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut existing[..overlap])?;
        }

        let mixed: Vec<u8> = existing
            .chunks_exact(4)
            .zip(buffer.samples.iter())
            .flat_map(|(bytes, sample)| {
                let current = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (current + sample).to_le_bytes()
            })
            .collect();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&mixed)?;
        self.frames = self.frames.max(start as u64 + buffer.frames() as u64);
        Ok(())
    }

    /// Read the whole timeline back
    pub fn samples(&mut self) -> Result<Vec<f32>, WriterError> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(crate::audio::decoder::samples_from_le_bytes(&bytes))
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        self.file.as_file_mut().flush()?;
        Ok(())
    }
}

pub struct FfmpegContainerWriter {
    program: String,
    output: PathBuf,
    video_path: PathBuf,
    fps: u32,
    frame_size: usize,
    status: Mutex<WriterStatus>,
    video: Mutex<Option<VideoTrack>>,
    audio: Mutex<AudioTimeline>,
    queued: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

impl FfmpegContainerWriter {
    /// Start the video encoder for `output`
    pub fn open(program: &str, output: &Path, settings: &RenderSettings) -> Result<Self, WriterError> {
        let dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let video_path = output.with_extension(format!("video.{}", settings.file_extension));

        let args = encoder_args(settings, &video_path);
        tracing::debug!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(WriterError::Spawn)?;

        let Some(stdin) = process.stdin.take() else {
            let _ = process.kill();
            return Err(WriterError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()));
        };

        let audio = match AudioTimeline::new(settings.audio_format, &dir) {
            Ok(audio) => audio,
            Err(e) => {
                let _ = process.kill();
                return Err(e);
            }
        };

        let (sender, receiver) = mpsc::channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let broken = Arc::new(AtomicBool::new(false));
        let thread = {
            let queued = queued.clone();
            let broken = broken.clone();
            std::thread::Builder::new()
                .name("framecast-encoder".to_string())
                .spawn(move || run_encoder(process, stdin, receiver, queued, broken))?
        };

        tracing::info!(
            "Writing {}x{} @ {}fps to {:?}",
            settings.width,
            settings.height,
            settings.fps,
            output
        );

        Ok(Self {
            program: program.to_string(),
            output: output.to_path_buf(),
            video_path,
            fps: settings.fps,
            frame_size: settings.width as usize * settings.height as usize * 4,
            status: Mutex::new(WriterStatus::Writing),
            video: Mutex::new(Some(VideoTrack {
                sender,
                thread,
                next_frame: 0,
                last: None,
            })),
            audio: Mutex::new(audio),
            queued,
            broken,
        })
    }

    async fn mux(&self, audio_path: &Path, format: AudioFormat) -> Result<(), WriterError> {
        let output = tokio::process::Command::new(&self.program)
            .args(mux_args(&self.video_path, audio_path, format, &self.output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(WriterError::Spawn)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WriterError::Ffmpeg(format!("Mux failed: {}", stderr.trim())));
        }
        let _ = tokio::fs::remove_file(&self.video_path).await;
        Ok(())
    }

    async fn finish_tracks(&self) -> Result<(), WriterError> {
        let track = self.video.lock().take();
        let Some(track) = track else {
            return Err(WriterError::NotWriting(self.status()));
        };
        drop(track.sender);
        let frames = tokio::task::spawn_blocking(move || track.thread.join())
            .await
            .map_err(|e| WriterError::Ffmpeg(format!("Encoder task failed: {}", e)))?
            .map_err(|_| WriterError::Ffmpeg("Encoder thread panicked".to_string()))??;
        tracing::debug!("Encoder finished: {} frames written", frames);

        let (audio_frames, audio_format, audio_path) = {
            let mut audio = self.audio.lock();
            audio.flush()?;
            (audio.frames(), audio.format, audio.path().to_path_buf())
        };

        if audio_frames == 0 {
            tokio::fs::rename(&self.video_path, &self.output).await?;
        } else {
            self.mux(&audio_path, audio_format).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerWriter for FfmpegContainerWriter {
    fn status(&self) -> WriterStatus {
        let status = *self.status.lock();
        if status == WriterStatus::Writing && self.broken.load(Ordering::SeqCst) {
            return WriterStatus::Failed;
        }
        status
    }

    fn is_ready_for_more(&self, track: TrackKind) -> bool {
        match track {
            TrackKind::Video => self.queued.load(Ordering::SeqCst) < VIDEO_QUEUE_CAPACITY,
            TrackKind::Audio => true,
        }
    }

    fn append_video(&self, frame: &PixelBuffer, time: MediaTime) -> Result<(), WriterError> {
        let status = self.status();
        if status != WriterStatus::Writing {
            return Err(WriterError::NotWriting(status));
        }
        if frame.data.len() != self.frame_size {
            return Err(WriterError::Ffmpeg(format!(
                "Frame is {} bytes, expected {}",
                frame.data.len(),
                self.frame_size
            )));
        }

        let mut video = self.video.lock();
        let Some(track) = video.as_mut() else {
            return Err(WriterError::NotWriting(status));
        };

        let index = time.rescale(self.fps).value.max(0) as u64;
        if index < track.next_frame {
            tracing::trace!("Skipping out-of-order frame {}", index);
            return Ok(());
        }
        if let Some(last) = &track.last {
            let gap = (index - track.next_frame).min(MAX_GAP_FRAMES);
            for _ in 0..gap {
                track.send(last.clone(), &self.queued)?;
            }
        }

        track.send(frame.data.clone(), &self.queued)?;
        track.last = Some(frame.data.clone());
        track.next_frame = index + 1;
        Ok(())
    }

    fn append_audio(&self, buffer: &PcmBuffer, time: MediaTime) -> Result<(), WriterError> {
        let status = self.status();
        if status != WriterStatus::Writing {
            return Err(WriterError::NotWriting(status));
        }
        self.audio.lock().mix(buffer, time)
    }

    async fn finish_writing(&self) -> Result<(), WriterError> {
        {
            let status = self.status.lock();
            if *status != WriterStatus::Writing {
                return Err(WriterError::NotWriting(*status));
            }
        }

        let result = self.finish_tracks().await;
        let mut status = self.status.lock();
        match &result {
            Ok(()) => {
                *status = WriterStatus::Completed;
                tracing::info!("Finished writing {:?}", self.output);
            }
            Err(e) => {
                *status = WriterStatus::Failed;
                tracing::error!("Failed to finish {:?}: {}", self.output, e);
            }
        }
        result
    }
}
