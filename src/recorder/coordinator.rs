//! Recording coordinator
//!
//! The session controller. Owns the state machine, the frame-timing loop and
//! the sink adapters, and runs the finalize sequence once the session ends.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::settings::{ConfigError, RenderSettings};
use super::state::{RecordingState, RecordingSummary, SessionShared, SessionView};
use super::stream::FrameStream;
use crate::audio::{AudioDecoder, AudioError, AudioSource, FfmpegAudioDecoder, PcmBuffer, PlayerState, PreloadCache};
use crate::capture::{RenderTarget, Renderer};
use crate::export::FfmpegBackend;
use crate::live::{DestinationConnector, DestinationReport, FfmpegConnector, LiveFanout};
use crate::sink::writer::{move_file, ContainerBackend, ContainerWriter, WriterError};
use crate::sink::{AudioSink, SinkStats, VideoSink};
use crate::utils::time::MediaTime;

/// Errors surfaced to callers of the recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recording already started (state: {state})")]
    AlreadyStarted { state: RecordingState },

    #[error("Not recording (state: {state})")]
    NotRecording { state: RecordingState },

    #[error("Output unavailable: {0}")]
    OutputUnavailable(#[from] WriterError),

    #[error("Failed to load audio from {audio}: {error}")]
    FailedToLoadAudio {
        audio: AudioSource,
        #[source]
        error: AudioError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started
    Started,
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// Frames captured so far, sent once per second of video
    Progress { frames: u64 },
    /// Finalize completed
    Finished(RecordingSummary),
    /// Error occurred
    Error(String),
}

/// Adapter tasks of a running session
#[derive(Default)]
struct SessionTasks {
    video: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
    timing: Option<JoinHandle<()>>,
}

/// Builds a [`Recorder`] with custom collaborators
pub struct RecorderBuilder {
    settings: RenderSettings,
    renderer: Arc<dyn Renderer>,
    backend: Option<Arc<dyn ContainerBackend>>,
    decoder: Option<Arc<dyn AudioDecoder>>,
    connector: Option<Arc<dyn DestinationConnector>>,
}

impl RecorderBuilder {
    /// Container backend (defaults to ffmpeg)
    pub fn backend(mut self, backend: Arc<dyn ContainerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Audio decoder (defaults to ffmpeg with the shared preload cache)
    pub fn decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Live destination connector (defaults to ffmpeg RTMP)
    pub fn connector(mut self, connector: Arc<dyn DestinationConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Arc<Recorder> {
        let settings = Arc::new(self.settings);
        let backend = self.backend.unwrap_or_else(|| Arc::new(FfmpegBackend::new()));
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(FfmpegAudioDecoder::new(PreloadCache::default())));
        let connector = self.connector.unwrap_or_else(|| Arc::new(FfmpegConnector));

        let session = Arc::new(SessionShared::new(settings.fps));
        let view: Arc<dyn SessionView> = session.clone();
        let live = Arc::new(LiveFanout::new(settings.clone(), connector));
        let video = VideoSink::new(
            view.clone(),
            live.clone(),
            settings.width,
            settings.height,
            settings.save_video_file,
        );
        let audio = Arc::new(AudioSink::new(
            view,
            live.clone(),
            decoder,
            settings.audio_format,
            settings.save_video_file,
        ));
        let (completion, _) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(100);

        Arc::new(Recorder {
            settings,
            renderer: self.renderer,
            backend,
            session,
            frames: FrameStream::new(),
            video_stats: video.stats(),
            video: Mutex::new(Some(video)),
            audio,
            live,
            starting: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
            transition: Mutex::new(()),
            tasks: Mutex::new(SessionTasks::default()),
            completion,
            event_tx,
        })
    }
}

/// One recording session
pub struct Recorder {
    settings: Arc<RenderSettings>,
    renderer: Arc<dyn Renderer>,
    backend: Arc<dyn ContainerBackend>,

    /// State, pause depth, frame clock and writer handle
    session: Arc<SessionShared>,

    frames: FrameStream,
    video: Mutex<Option<VideoSink>>,
    video_stats: Arc<SinkStats>,
    audio: Arc<AudioSink>,
    live: Arc<LiveFanout>,

    /// Set while `start` is opening the output
    starting: AtomicBool,

    /// Stops the timing loop
    cancelled: AtomicBool,

    /// Wakes the timing loop out of its pacing sleep
    wake: Notify,

    /// Serializes pause/resume/stop with their audio side effects
    transition: Mutex<()>,

    tasks: Mutex<SessionTasks>,
    completion: watch::Sender<Option<RecordingSummary>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    /// Recorder backed by ffmpeg for encoding, decoding and live publishing
    pub fn new(settings: RenderSettings, renderer: Arc<dyn Renderer>) -> Arc<Self> {
        Self::builder(settings, renderer).build()
    }

    pub fn builder(settings: RenderSettings, renderer: Arc<dyn Renderer>) -> RecorderBuilder {
        RecorderBuilder {
            settings,
            renderer,
            backend: None,
            decoder: None,
            connector: None,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        self.session.control.state()
    }

    /// Outstanding pause requests
    pub fn pause_depth(&self) -> u32 {
        self.session.control.pause_depth()
    }

    /// Frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.session.clock.frame_count()
    }

    /// Timestamp the next captured frame will carry
    pub fn current_time(&self) -> MediaTime {
        self.session.clock.current_timestamp()
    }

    /// Virtual time the timing loop has paced through
    pub fn elapsed(&self) -> Duration {
        self.session.clock.elapsed()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn video_stats(&self) -> Arc<SinkStats> {
        self.video_stats.clone()
    }

    pub fn audio_stats(&self) -> Arc<SinkStats> {
        self.audio.stats()
    }

    pub fn live_reports(&self) -> Vec<DestinationReport> {
        self.live.reports()
    }

    /// Start recording
    ///
    /// Opens the output, launches the adapters and live streaming, then the
    /// timing loop. If the settings are invalid or the output can't be opened
    /// the session stays idle.
    pub async fn start(self: &Arc<Self>) -> RecorderResult<()> {
        if let Err(e) = self.settings.validate() {
            tracing::error!("Refusing to start with invalid settings: {}", e);
            return Err(e.into());
        }

        let state = self.state();
        if state != RecordingState::Idle || self.starting.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::AlreadyStarted { state });
        }

        let writer = match self.open_output() {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                self.starting.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.session.set_writer(writer);
        self.session.clock.start();

        let began = {
            let _guard = self.transition.lock();
            self.session.control.begin()
        };
        let began = match began {
            Ok(began) => began,
            Err(e) => {
                self.starting.store(false, Ordering::SeqCst);
                return Err(RecorderError::AlreadyStarted {
                    state: e.current_state,
                });
            }
        };

        let mut tasks = SessionTasks::default();
        let video = self.video.lock().take();
        if let (Some(video), Some(frames)) = (video, self.frames.take_consumer()) {
            tasks.video = Some(video.spawn(frames));
        }
        tasks.audio = self.audio.spawn_drain();
        self.audio.start_engine();
        self.live.start_streaming();
        // Stored before the loop exists so finalize always finds the drains
        *self.tasks.lock() = tasks;

        let recorder = Arc::clone(self);
        let timing = tokio::spawn(async move {
            recorder.run_timing_loop().await;
            recorder.finalize().await;
        });
        self.tasks.lock().timing = Some(timing);

        tracing::info!(
            "Recording started: {}x{} @ {}fps{}",
            self.settings.width,
            self.settings.height,
            self.settings.fps,
            if began == RecordingState::Paused {
                " (paused)"
            } else {
                ""
            }
        );
        let _ = self.event_tx.send(RecordingEvent::Started);
        Ok(())
    }

    fn open_output(&self) -> RecorderResult<Option<Arc<dyn ContainerWriter>>> {
        if !self.settings.save_video_file {
            return Ok(None);
        }
        self.settings.prepare_directories()?;
        let path = self.settings.temp_output_path();
        let writer = self.backend.open_writer(&path, &self.settings)?;
        tracing::debug!("Opened output {:?}", path);
        Ok(Some(writer))
    }

    /// Request a pause
    ///
    /// Nested requests stack; the session records again only after the
    /// same number of `resume` calls.
    pub fn pause(&self) {
        let _guard = self.transition.lock();
        if self.session.control.pause() {
            let suspended = self.audio.suspend_playing();
            tracing::info!(
                "Recording paused ({} audio source(s) suspended)",
                suspended.len()
            );
            let _ = self.event_tx.send(RecordingEvent::Paused);
        } else {
            tracing::debug!("Pause depth now {}", self.session.control.pause_depth());
        }
    }

    /// Release one pause request
    pub fn resume(&self) {
        let _guard = self.transition.lock();
        if self.session.control.resume() {
            let resumed = self.audio.resume_suspended();
            tracing::info!(
                "Recording resumed ({} audio source(s) resumed)",
                resumed.len()
            );
            self.wake.notify_waiters();
            let _ = self.event_tx.send(RecordingEvent::Resumed);
        } else {
            tracing::debug!("Pause depth now {}", self.session.control.pause_depth());
        }
    }

    /// Stop recording and begin finalizing
    ///
    /// Returns immediately; use [`Recorder::wait_for_completion`] to wait
    /// for the output file.
    pub fn stop(&self) -> RecorderResult<()> {
        let _guard = self.transition.lock();
        let previous = self
            .session
            .control
            .finish()
            .map_err(|e| RecorderError::NotRecording {
                state: e.current_state,
            })?;
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        tracing::info!(
            "Stopping recording (was {}) after {} frames",
            previous,
            self.frame_count()
        );
        Ok(())
    }

    /// Wait until finalize has completed
    pub async fn wait_for_completion(&self) -> RecorderResult<RecordingSummary> {
        if self.state() == RecordingState::Idle {
            return Err(RecorderError::NotRecording {
                state: RecordingState::Idle,
            });
        }
        let mut completion = self.completion.subscribe();
        let summary = completion
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|summary| summary.clone());
        summary.ok_or(RecorderError::NotRecording {
            state: self.state(),
        })
    }

    /// Decode an audio source, pausing the recording while it loads
    pub async fn load_audio(&self, source: impl Into<AudioSource>) -> RecorderResult<()> {
        let source = source.into();
        self.pause();
        let result = self.audio.load(&source).await;
        self.resume();
        result.map_err(|error| {
            tracing::error!("Failed to load audio {}: {}", source, error);
            RecorderError::FailedToLoadAudio {
                audio: source,
                error,
            }
        })
    }

    /// Play a loaded source from its beginning at the current recording time
    pub fn play_audio(&self, source: impl Into<AudioSource>) {
        let source = source.into();
        if let Err(e) = self.audio.play(&source) {
            tracing::warn!("Cannot play {}: {}", source, e);
        }
    }

    pub fn stop_audio(&self, source: impl Into<AudioSource>) {
        self.audio.stop(&source.into());
    }

    pub fn pause_audio(&self, source: impl Into<AudioSource>) {
        self.audio.pause(&source.into());
    }

    pub fn resume_audio(&self, source: impl Into<AudioSource>) {
        self.audio.resume(&source.into());
    }

    pub fn audio_state(&self, source: impl Into<AudioSource>) -> Option<PlayerState> {
        self.audio.player_state(&source.into())
    }

    pub fn is_audio_playing(&self, source: impl Into<AudioSource>) -> bool {
        self.audio.is_playing(&source.into())
    }

    /// Push externally produced audio into the session
    ///
    /// Dropped unless the session is recording.
    pub fn enqueue_audio(&self, buffer: PcmBuffer, time: MediaTime) -> bool {
        self.audio.enqueue(buffer, time)
    }

    async fn run_timing_loop(&self) {
        let frame_duration = self.settings.frame_duration();
        let budget = self.settings.total_frames();
        let target = RenderTarget {
            width: self.settings.width,
            height: self.settings.height,
            scale: self.settings.display_scale,
        };

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            match self.state() {
                RecordingState::Finished | RecordingState::Idle => break,
                RecordingState::Paused => {
                    self.pace(frame_duration).await;
                    continue;
                }
                RecordingState::Recording => {}
            }

            if let Some(budget) = budget {
                if self.frame_count() >= budget {
                    tracing::info!("Capture duration reached ({} frames)", budget);
                    let _ = self.stop();
                    break;
                }
            }

            let started = Instant::now();
            self.capture_frame(target);
            self.session.clock.advance(frame_duration);

            match frame_duration.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => self.pace(remaining).await,
                // Behind real time; keep capturing without sleeping
                _ => tokio::task::yield_now().await,
            }
        }
    }

    /// Sleep, waking early on stop or resume
    async fn pace(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    fn capture_frame(&self, target: RenderTarget) {
        let Some(image) = self.renderer.render(target) else {
            tracing::trace!("Renderer produced no image; frame skipped");
            return;
        };
        // The renderer may run long; a pause or stop issued meanwhile wins.
        // Held until the clock moves so no transition lands in between.
        let frames = {
            let _guard = self.transition.lock();
            if self.state() != RecordingState::Recording {
                return;
            }
            let time = self.session.clock.current_timestamp();
            if !self.frames.enqueue(image, time) {
                return;
            }
            self.session.clock.increment_frame()
        };
        if frames.checked_rem(self.settings.fps as u64) == Some(0) {
            let _ = self.event_tx.send(RecordingEvent::Progress { frames });
        }
    }

    async fn finalize(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());

        self.frames.finish();
        if let Some(video) = tasks.video {
            if let Err(e) = video.await {
                tracing::error!("Video sink task failed: {}", e);
            }
        }

        self.audio.stop_engine().await;
        self.audio.finish();
        if let Some(audio) = tasks.audio {
            if let Err(e) = audio.await {
                tracing::error!("Audio sink task failed: {}", e);
            }
        }

        let (output_path, trimmed) = match self.session.writer() {
            Some(writer) => match writer.finish_writing().await {
                Ok(()) => self.place_output().await,
                Err(e) => {
                    tracing::error!("Failed to finish writing: {}", e);
                    let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                    (None, false)
                }
            },
            None => (None, false),
        };

        // After the file is in place; a stalled destination only delays this
        self.live.stop_streaming().await;

        let frames_captured = self.frame_count();
        let summary = RecordingSummary {
            frames_captured,
            duration_ms: frames_captured as f64 * 1000.0 / self.settings.fps.max(1) as f64,
            output_path,
            trimmed,
        };
        tracing::info!(
            "Recording finished: {} frames ({:.0}ms){}",
            summary.frames_captured,
            summary.duration_ms,
            summary
                .output_path
                .as_ref()
                .map(|p| format!(" -> {:?}", p))
                .unwrap_or_default()
        );

        self.completion.send_replace(Some(summary.clone()));
        let _ = self.event_tx.send(RecordingEvent::Finished(summary));
    }

    /// Trim to the capture duration, or move the file into place as is
    async fn place_output(&self) -> (Option<PathBuf>, bool) {
        let temp = self.settings.temp_output_path();
        let destination = self.settings.output_path();

        if let Some(duration) = self.settings.capture_duration {
            if let Some(parent) = destination.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!("Failed to create {:?}: {}", parent, e);
                }
            }
            match self.backend.trim(&temp, &destination, duration).await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&temp).await;
                    return (Some(destination), true);
                }
                Err(e) => {
                    tracing::warn!("Trim failed, keeping untrimmed recording: {}", e);
                    let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                }
            }
        }

        match move_file(&temp, &destination).await {
            Ok(path) => (Some(path), false),
            Err(e) => {
                tracing::error!("Failed to move recording to {:?}: {}", destination, e);
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                (None, false)
            }
        }
    }
}
