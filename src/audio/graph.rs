//! Owned audio mixing graph
//!
//! The graph holds one decoded buffer per loaded source and at most one
//! player node per source. A silent baseline input is always attached so the
//! graph keeps rendering with zero players, which lets player nodes attach
//! and detach at any time without restarting it.
//!
//! Rendering pulls one tap buffer from every playing node. Each tap is
//! stamped from the node's own anchor (the recording time at which it started
//! playing) plus the number of frames it has played, so taps from one source
//! are strictly increasing while taps from different sources interleave in
//! pull order.

use std::collections::{HashMap, HashSet};

use super::buffer::{self, AudioFormat, PcmBuffer};
use super::{AudioError, AudioSource};
use crate::utils::time::MediaTime;

/// Length of one tap buffer in seconds
pub const TAP_DURATION_SECS: f64 = 0.1;

/// Player node state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Paused,
    Finished,
}

/// One tapped block of a player node's output
#[derive(Debug, Clone)]
pub struct Tap {
    pub source: AudioSource,
    pub buffer: PcmBuffer,
    pub time: MediaTime,
}

struct PlayerNode {
    buffer: PcmBuffer,
    position: usize,
    anchor: i64,
    state: PlayerState,
}

impl PlayerNode {
    fn render(&mut self, source: &AudioSource, frames: usize) -> Option<Tap> {
        if self.state != PlayerState::Playing {
            return None;
        }

        let chunk = self.buffer.slice_frames(self.position, frames);
        if chunk.is_empty() {
            self.state = PlayerState::Finished;
            return None;
        }

        let time = MediaTime::new(
            self.anchor + self.position as i64,
            self.buffer.format.sample_rate,
        );
        self.position += chunk.frames();
        if self.position >= self.buffer.frames() {
            self.state = PlayerState::Finished;
        }

        Some(Tap {
            source: source.clone(),
            buffer: chunk,
            time,
        })
    }
}

/// Baseline input, pulled on every render whether or not anything plays
///
/// It emits no taps. Stretches with no player output stay silent in the
/// written file because the writer's PCM timeline is zero-filled between
/// taps and the mux pads the audio track (`apad`) to the video length.
#[derive(Default)]
struct SilenceNode {
    frames_rendered: u64,
}

impl SilenceNode {
    fn render(&mut self, frames: usize) {
        self.frames_rendered += frames as u64;
    }
}

/// Mixing graph owned by the audio sink
pub struct AudioGraph {
    format: AudioFormat,
    running: bool,
    silence: SilenceNode,
    buffers: HashMap<AudioSource, PcmBuffer>,
    players: HashMap<AudioSource, PlayerNode>,
    playing: HashSet<AudioSource>,
    suspended: HashSet<AudioSource>,
}

impl AudioGraph {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            running: false,
            silence: SilenceNode::default(),
            buffers: HashMap::new(),
            players: HashMap::new(),
            playing: HashSet::new(),
            suspended: HashSet::new(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Frames per tap buffer
    pub fn tap_frames(&self) -> usize {
        self.format.frames_for_secs(TAP_DURATION_SECS)
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop rendering and tear down every player node
    pub fn stop(&mut self) {
        self.running = false;
        self.players.clear();
        self.playing.clear();
        self.suspended.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames pulled through the graph since it was created
    pub fn frames_rendered(&self) -> u64 {
        self.silence.frames_rendered
    }

    /// Register a decoded buffer, converting it to the graph format
    pub fn insert_buffer(&mut self, source: AudioSource, decoded: PcmBuffer) -> Result<(), AudioError> {
        let converted = buffer::convert(&decoded, self.format)?;
        tracing::debug!(
            "Loaded {} ({} frames @ {}Hz)",
            source,
            converted.frames(),
            self.format.sample_rate
        );
        self.buffers.insert(source, converted);
        Ok(())
    }

    pub fn is_loaded(&self, source: &AudioSource) -> bool {
        self.buffers.contains_key(source)
    }

    /// Attach a new player node for `source` and start it at recording time `at`
    ///
    /// Any node already playing that source is torn down first.
    pub fn play(&mut self, source: &AudioSource, at: MediaTime) -> Result<(), AudioError> {
        let buffer = self
            .buffers
            .get(source)
            .cloned()
            .ok_or_else(|| AudioError::NotLoaded(source.clone()))?;

        self.stop_source(source);
        let anchor = at.rescale(self.format.sample_rate).value;
        self.players.insert(
            source.clone(),
            PlayerNode {
                buffer,
                position: 0,
                anchor,
                state: PlayerState::Playing,
            },
        );
        self.playing.insert(source.clone());
        Ok(())
    }

    /// Detach the player node for `source`
    pub fn stop_source(&mut self, source: &AudioSource) -> bool {
        self.playing.remove(source);
        self.suspended.remove(source);
        self.players.remove(source).is_some()
    }

    pub fn pause_source(&mut self, source: &AudioSource) {
        if let Some(node) = self.players.get_mut(source) {
            if node.state == PlayerState::Playing {
                node.state = PlayerState::Paused;
            }
        }
        self.playing.remove(source);
    }

    /// Resume a paused source at recording time `at`
    ///
    /// The node is re-anchored so its next tap is stamped `at`, not where it
    /// left off.
    pub fn resume_source(&mut self, source: &AudioSource, at: MediaTime) {
        if let Some(node) = self.players.get_mut(source) {
            if node.state == PlayerState::Paused {
                node.anchor = at.rescale(self.format.sample_rate).value - node.position as i64;
                node.state = PlayerState::Playing;
                self.playing.insert(source.clone());
            }
        }
        self.suspended.remove(source);
    }

    /// Pause every currently playing source, remembering which ones were paused
    pub fn suspend_playing(&mut self) -> Vec<AudioSource> {
        let sources: Vec<AudioSource> = self.playing.drain().collect();
        for source in &sources {
            if let Some(node) = self.players.get_mut(source) {
                node.state = PlayerState::Paused;
            }
        }
        self.suspended.extend(sources.iter().cloned());
        sources
    }

    /// Resume only the sources paused by [`AudioGraph::suspend_playing`]
    pub fn resume_suspended(&mut self) -> Vec<AudioSource> {
        let sources: Vec<AudioSource> = self.suspended.drain().collect();
        for source in &sources {
            if let Some(node) = self.players.get_mut(source) {
                if node.state == PlayerState::Paused {
                    node.state = PlayerState::Playing;
                    self.playing.insert(source.clone());
                }
            }
        }
        sources
    }

    pub fn player_state(&self, source: &AudioSource) -> Option<PlayerState> {
        self.players.get(source).map(|node| node.state)
    }

    pub fn is_playing(&self, source: &AudioSource) -> bool {
        self.playing.contains(source)
    }

    /// Pull one tap buffer from every playing node
    pub fn render(&mut self) -> Vec<Tap> {
        if !self.running {
            return Vec::new();
        }

        let frames = self.tap_frames();
        self.silence.render(frames);

        let mut taps = Vec::new();
        let mut finished = Vec::new();
        for source in &self.playing {
            let Some(node) = self.players.get_mut(source) else {
                continue;
            };
            if let Some(tap) = node.render(source, frames) {
                taps.push(tap);
            }
            if node.state == PlayerState::Finished {
                finished.push(source.clone());
            }
        }
        for source in finished {
            tracing::debug!("Audio source {} played to the end", source);
            self.playing.remove(&source);
        }
        taps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(sources: &[(&str, usize)]) -> AudioGraph {
        let format = AudioFormat::new(1000, 1);
        let mut graph = AudioGraph::new(format);
        for (id, frames) in sources {
            graph
                .insert_buffer(AudioSource::new(*id), PcmBuffer::silence(format, *frames))
                .unwrap();
        }
        graph.start();
        graph
    }

    #[test]
    fn test_play_requires_loaded_buffer() {
        let mut graph = graph_with(&[]);
        let err = graph.play(&"missing".into(), MediaTime::ZERO).unwrap_err();
        assert!(matches!(err, AudioError::NotLoaded(_)));
    }

    #[test]
    fn test_taps_are_stamped_from_anchor() {
        let mut graph = graph_with(&[("a", 250)]);
        graph.play(&"a".into(), MediaTime::from_frame(3, 10)).unwrap();

        let first = graph.render();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].buffer.frames(), 100);
        assert_eq!(first[0].time, MediaTime::new(300, 1000));

        let second = graph.render();
        assert_eq!(second[0].time, MediaTime::new(400, 1000));

        let last = graph.render();
        assert_eq!(last[0].buffer.frames(), 50);
        assert!(!graph.is_playing(&"a".into()));
        assert_eq!(graph.player_state(&"a".into()), Some(PlayerState::Finished));
        assert!(graph.render().is_empty());
    }

    #[test]
    fn test_graph_renders_without_players() {
        let mut graph = graph_with(&[]);
        assert!(graph.render().is_empty());
        assert_eq!(graph.frames_rendered(), 100);
    }

    #[test]
    fn test_stopped_graph_renders_nothing() {
        let mut graph = graph_with(&[("a", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.stop();
        assert!(graph.render().is_empty());
        assert_eq!(graph.player_state(&"a".into()), None);
    }

    #[test]
    fn test_suspend_only_touches_playing_sources() {
        let mut graph = graph_with(&[("a", 1000), ("b", 1000), ("c", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.play(&"b".into(), MediaTime::ZERO).unwrap();
        graph.play(&"c".into(), MediaTime::ZERO).unwrap();
        graph.stop_source(&"b".into());
        graph.pause_source(&"c".into());

        let mut suspended = graph.suspend_playing();
        suspended.sort();
        assert_eq!(suspended, vec![AudioSource::new("a")]);
        assert!(graph.render().is_empty());

        graph.resume_suspended();
        assert!(graph.is_playing(&"a".into()));
        assert_eq!(graph.player_state(&"b".into()), None);
        assert_eq!(graph.player_state(&"c".into()), Some(PlayerState::Paused));
    }

    #[test]
    fn test_resumed_source_is_restamped_at_resume_time() {
        let mut graph = graph_with(&[("a", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.render();
        graph.render();
        graph.pause_source(&"a".into());
        assert!(graph.render().is_empty());

        graph.resume_source(&"a".into(), MediaTime::new(2, 1));
        let taps = graph.render();
        assert_eq!(taps[0].time, MediaTime::new(2000, 1000));
        assert_eq!(graph.render()[0].time, MediaTime::new(2100, 1000));
    }

    #[test]
    fn test_resume_suspended_keeps_anchor() {
        let mut graph = graph_with(&[("a", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.render();
        graph.suspend_playing();
        graph.resume_suspended();
        assert_eq!(graph.render()[0].time, MediaTime::new(100, 1000));
    }

    #[test]
    fn test_source_stopped_while_suspended_stays_stopped() {
        let mut graph = graph_with(&[("a", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.suspend_playing();
        graph.stop_source(&"a".into());
        assert!(graph.resume_suspended().is_empty());
        assert!(!graph.is_playing(&"a".into()));
    }

    #[test]
    fn test_replay_restarts_from_beginning() {
        let mut graph = graph_with(&[("a", 1000)]);
        graph.play(&"a".into(), MediaTime::ZERO).unwrap();
        graph.render();
        graph.play(&"a".into(), MediaTime::new(2, 1)).unwrap();
        let taps = graph.render();
        assert_eq!(taps[0].time, MediaTime::new(2000, 1000));
    }
}
