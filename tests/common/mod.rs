//! Shared fakes for session tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use framecast::audio::{AudioDecoder, AudioError, AudioFormat, AudioSource, PcmBuffer};
use framecast::capture::{CapturedImage, RenderTarget, Renderer};
use framecast::live::{DestinationConnector, LiveDestination, LiveError};
use framecast::recorder::{LiveDestinationSettings, Recorder, RenderSettings};
use framecast::sink::{ContainerBackend, ContainerWriter, MediaSample, PixelBuffer, TrackKind, WriterError, WriterStatus};
use framecast::utils::MediaTime;

type RenderHook = Box<dyn Fn() + Send + Sync>;

/// Renders a solid frame; optionally skips every `skip_every`th call
///
/// A hook registered with [`TestRenderer::on_call`] runs in the middle of
/// that call, after rendering has started but before the image is returned.
#[derive(Default)]
pub struct TestRenderer {
    pub calls: AtomicU64,
    pub skip_every: Option<u64>,
    pub hook: Mutex<Option<(u64, RenderHook)>>,
}

impl TestRenderer {
    pub fn on_call(&self, call: u64, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock() = Some((call, Box::new(hook)));
    }
}

impl Renderer for TestRenderer {
    fn render(&self, target: RenderTarget) -> Option<CapturedImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, hook)) = self.hook.lock().as_ref() {
            if *at == call {
                hook();
            }
        }
        if let Some(every) = self.skip_every {
            if call % every == 0 {
                return None;
            }
        }
        let (width, height) = target.pixel_size();
        Some(CapturedImage::rgba(
            width,
            height,
            vec![128; (width * height * 4) as usize],
        ))
    }
}

/// Writer that keeps every appended timestamp in memory
pub struct MemoryWriter {
    pub path: PathBuf,
    pub status: Mutex<WriterStatus>,
    pub video: Mutex<Vec<MediaTime>>,
    pub audio: Mutex<Vec<(MediaTime, usize)>>,
}

#[async_trait]
impl ContainerWriter for MemoryWriter {
    fn status(&self) -> WriterStatus {
        *self.status.lock()
    }

    fn is_ready_for_more(&self, _track: TrackKind) -> bool {
        true
    }

    fn append_video(&self, _frame: &PixelBuffer, time: MediaTime) -> Result<(), WriterError> {
        self.video.lock().push(time);
        Ok(())
    }

    fn append_audio(&self, buffer: &PcmBuffer, time: MediaTime) -> Result<(), WriterError> {
        self.audio.lock().push((time, buffer.frames()));
        Ok(())
    }

    async fn finish_writing(&self) -> Result<(), WriterError> {
        let contents = format!("{} video, {} audio", self.video.lock().len(), self.audio.lock().len());
        tokio::fs::write(&self.path, contents).await?;
        *self.status.lock() = WriterStatus::Completed;
        Ok(())
    }
}

/// Backend that hands out [`MemoryWriter`]s and trims by copying
#[derive(Default)]
pub struct MemoryBackend {
    pub writers: Mutex<Vec<Arc<MemoryWriter>>>,
    pub trims: Mutex<Vec<Duration>>,
    pub fail_trim: AtomicBool,
}

impl MemoryBackend {
    pub fn writer(&self) -> Arc<MemoryWriter> {
        self.writers.lock()[0].clone()
    }

    pub fn video_times(&self) -> Vec<MediaTime> {
        self.writer().video.lock().clone()
    }
}

#[async_trait]
impl ContainerBackend for MemoryBackend {
    fn open_writer(
        &self,
        path: &Path,
        _settings: &RenderSettings,
    ) -> Result<Arc<dyn ContainerWriter>, WriterError> {
        let writer = Arc::new(MemoryWriter {
            path: path.to_path_buf(),
            status: Mutex::new(WriterStatus::Writing),
            video: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
        });
        self.writers.lock().push(writer.clone());
        Ok(writer as Arc<dyn ContainerWriter>)
    }

    async fn trim(
        &self,
        source: &Path,
        destination: &Path,
        duration: Duration,
    ) -> Result<(), WriterError> {
        if self.fail_trim.load(Ordering::SeqCst) {
            return Err(WriterError::Ffmpeg("trim unavailable".into()));
        }
        self.trims.lock().push(duration);
        tokio::fs::copy(source, destination).await?;
        Ok(())
    }
}

/// Decodes every source into `seconds` of silence; "broken" fails
pub struct SilenceDecoder {
    pub seconds: f64,
}

#[async_trait]
impl AudioDecoder for SilenceDecoder {
    async fn decode(&self, source: &AudioSource, format: AudioFormat) -> Result<PcmBuffer, AudioError> {
        if source.as_str() == "broken" {
            return Err(AudioError::Decode {
                source_id: source.to_string(),
                message: "unsupported format".into(),
            });
        }
        Ok(PcmBuffer::silence(format, format.frames_for_secs(self.seconds)))
    }
}

/// Connector whose destinations record what they receive; URIs containing
/// "unreachable" fail to connect and "stalled" ones never finish an append
#[derive(Default)]
pub struct TestConnector {
    pub received: Arc<Mutex<Vec<(String, bool)>>>,
}

struct RecordingDestination {
    key: String,
    stalled: bool,
    received: Arc<Mutex<Vec<(String, bool)>>>,
}

#[async_trait]
impl LiveDestination for RecordingDestination {
    async fn publish(&mut self, stream_key: &str) -> Result<(), LiveError> {
        self.key = stream_key.to_string();
        Ok(())
    }

    async fn append(&mut self, sample: &MediaSample) -> Result<(), LiveError> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.received.lock().push((self.key.clone(), sample.is_video()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LiveError> {
        Ok(())
    }
}

#[async_trait]
impl DestinationConnector for TestConnector {
    async fn connect(
        &self,
        destination: &LiveDestinationSettings,
        _settings: &RenderSettings,
    ) -> Result<Box<dyn LiveDestination>, LiveError> {
        if destination.uri.contains("unreachable") {
            return Err(LiveError::Connect {
                uri: destination.uri.clone(),
                message: "connection refused".into(),
            });
        }
        Ok(Box::new(RecordingDestination {
            key: String::new(),
            stalled: destination.uri.contains("stalled"),
            received: self.received.clone(),
        }))
    }
}

/// A recorder wired to in-memory collaborators
pub struct Harness {
    pub recorder: Arc<Recorder>,
    pub backend: Arc<MemoryBackend>,
    pub renderer: Arc<TestRenderer>,
    pub connector: Arc<TestConnector>,
    pub dir: TempDir,
}

pub fn settings(fps: u32, capture: Option<Duration>, dir: &TempDir) -> RenderSettings {
    let settings = RenderSettings::new("session", 8, 8, fps).with_videos_dir(dir.path());
    match capture {
        Some(duration) => settings.with_capture_duration(duration),
        None => settings,
    }
}

pub fn harness(fps: u32, capture: Option<Duration>) -> Harness {
    harness_with(|dir| settings(fps, capture, dir), TestRenderer::default())
}

pub fn harness_with(
    build: impl FnOnce(&TempDir) -> RenderSettings,
    renderer: TestRenderer,
) -> Harness {
    harness_with_audio(build, renderer, 0.3)
}

/// Like [`harness_with`], decoding every audio source to `seconds` of silence
pub fn harness_with_audio(
    build: impl FnOnce(&TempDir) -> RenderSettings,
    renderer: TestRenderer,
    seconds: f64,
) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let backend = Arc::new(MemoryBackend::default());
    let renderer = Arc::new(renderer);
    let connector = Arc::new(TestConnector::default());
    let recorder = Recorder::builder(build(&dir), renderer.clone())
        .backend(backend.clone())
        .decoder(Arc::new(SilenceDecoder { seconds }))
        .connector(connector.clone())
        .build();
    Harness {
        recorder,
        backend,
        renderer,
        connector,
        dir,
    }
}

/// Sleep in small steps until the recorder has captured `frames` frames
pub async fn wait_for_frames(recorder: &Recorder, frames: u64) {
    while recorder.frame_count() < frames {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
