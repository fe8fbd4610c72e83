//! Audio sink adapter
//!
//! Owns the mixing graph. Player nodes are rendered in 100 ms taps while the
//! session records; every tap (and any buffer pushed in from outside) goes
//! through one audio stream, then to the writer's audio track and the live
//! fan-out.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::sample::MediaSample;
use super::writer::{TrackKind, WriterStatus};
use super::SinkStats;
use crate::audio::graph::TAP_DURATION_SECS;
use crate::audio::{AudioDecoder, AudioError, AudioFormat, AudioGraph, AudioSource, PcmBuffer, PlayerState};
use crate::live::LiveFanout;
use crate::recorder::state::{RecordingState, SessionView};
use crate::recorder::stream::AudioStream;
use crate::utils::time::MediaTime;

pub struct AudioSink {
    session: Arc<dyn SessionView>,
    live: Arc<LiveFanout>,
    decoder: Arc<dyn AudioDecoder>,
    graph: Mutex<AudioGraph>,
    stream: AudioStream,
    save_video_file: bool,
    stats: Arc<SinkStats>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl AudioSink {
    pub fn new(
        session: Arc<dyn SessionView>,
        live: Arc<LiveFanout>,
        decoder: Arc<dyn AudioDecoder>,
        format: AudioFormat,
        save_video_file: bool,
    ) -> Self {
        Self {
            session,
            live,
            decoder,
            graph: Mutex::new(AudioGraph::new(format)),
            stream: AudioStream::new(),
            save_video_file,
            stats: Arc::new(SinkStats::default()),
            engine: Mutex::new(None),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.graph.lock().format()
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }

    /// Decode `source` once and register it with the graph
    pub async fn load(&self, source: &AudioSource) -> Result<(), AudioError> {
        if self.graph.lock().is_loaded(source) {
            tracing::debug!("Audio {} already loaded", source);
            return Ok(());
        }
        let format = self.format();
        let decoded = self.decoder.decode(source, format).await?;
        let converted = self.decoder.convert(&decoded, format)?;
        self.graph.lock().insert_buffer(source.clone(), converted)
    }

    pub fn is_loaded(&self, source: &AudioSource) -> bool {
        self.graph.lock().is_loaded(source)
    }

    /// Start `source` from the beginning at the current recording time
    pub fn play(&self, source: &AudioSource) -> Result<(), AudioError> {
        let at = self.session.current_time();
        self.graph.lock().play(source, at)?;
        tracing::debug!("Playing {} from {}", source, at);
        Ok(())
    }

    pub fn stop(&self, source: &AudioSource) {
        if self.graph.lock().stop_source(source) {
            tracing::debug!("Stopped {}", source);
        }
    }

    pub fn pause(&self, source: &AudioSource) {
        self.graph.lock().pause_source(source);
    }

    /// Resume a paused source from where it stopped, stamped from now
    pub fn resume(&self, source: &AudioSource) {
        let at = self.session.current_time();
        self.graph.lock().resume_source(source, at);
    }

    /// Pause only the sources that are playing right now
    pub fn suspend_playing(&self) -> Vec<AudioSource> {
        self.graph.lock().suspend_playing()
    }

    /// Resume the sources paused by [`AudioSink::suspend_playing`]
    pub fn resume_suspended(&self) -> Vec<AudioSource> {
        self.graph.lock().resume_suspended()
    }

    pub fn player_state(&self, source: &AudioSource) -> Option<PlayerState> {
        self.graph.lock().player_state(source)
    }

    pub fn is_playing(&self, source: &AudioSource) -> bool {
        self.graph.lock().is_playing(source)
    }

    /// Queue a buffer for encoding
    ///
    /// Accepted only while the session is recording.
    pub fn enqueue(&self, buffer: PcmBuffer, time: MediaTime) -> bool {
        if self.session.state() != RecordingState::Recording {
            tracing::trace!("Session not recording, dropping audio at {}", time);
            return false;
        }
        self.stream.enqueue(buffer, time)
    }

    /// Pull one tap from every playing source into the stream
    pub fn render_taps(&self) -> usize {
        if self.session.state() != RecordingState::Recording {
            return 0;
        }
        let taps = self.graph.lock().render();
        let count = taps.len();
        for tap in taps {
            self.enqueue(tap.buffer, tap.time);
        }
        count
    }

    /// Start the graph and its tap ticker
    pub fn start_engine(self: &Arc<Self>) {
        self.graph.lock().start();
        let sink = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs_f64(TAP_DURATION_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !sink.graph.lock().is_running() {
                    break;
                }
                sink.render_taps();
            }
        });
        *self.engine.lock() = Some(handle);
    }

    /// Stop the graph, tear down every player and wait for the ticker
    pub async fn stop_engine(&self) {
        self.graph.lock().stop();
        let handle = self.engine.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Audio engine task failed: {}", e);
            }
        }
    }

    /// Append to the writer's audio track and mirror to live destinations
    pub fn process_sample(&self, buffer: PcmBuffer, time: MediaTime) {
        self.stats.record_received();

        if self.save_video_file {
            self.append_to_writer(&buffer, time);
        }

        self.live.append_sample(&MediaSample::Audio { buffer, time });
    }

    fn append_to_writer(&self, buffer: &PcmBuffer, time: MediaTime) {
        let Some(writer) = self.session.writer() else {
            self.stats.record_dropped();
            return;
        };
        if writer.status() != WriterStatus::Writing || !writer.is_ready_for_more(TrackKind::Audio) {
            tracing::trace!("Audio input not ready, dropping sample at {}", time);
            self.stats.record_dropped();
            return;
        }
        match writer.append_audio(buffer, time) {
            Ok(()) => self.stats.record_appended(),
            Err(e) => {
                tracing::trace!("Failed to append audio at {}: {}", time, e);
                self.stats.record_dropped();
            }
        }
    }

    /// Consume the audio stream until it is finished and drained
    ///
    /// Returns `None` if the stream has already been taken.
    pub fn spawn_drain(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut samples = self.stream.take_consumer()?;
        let sink = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(sample) = samples.recv().await {
                sink.process_sample(sample.item, sample.time);
            }
            tracing::debug!(
                "Audio sink drained ({} appended, {} dropped)",
                sink.stats.appended(),
                sink.stats.dropped()
            );
        }))
    }

    /// No more audio will be accepted
    pub fn finish(&self) {
        self.stream.finish();
    }
}
