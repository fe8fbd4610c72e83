//! Recording state management
//!
//! Defines the session state machine, the nested pause counter and the
//! narrow read-only view sink adapters use to query the session.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::clock::FrameClock;
use crate::sink::writer::ContainerWriter;
use crate::utils::time::MediaTime;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Not started yet
    #[default]
    Idle,
    /// Capturing frames
    Recording,
    /// Capture suspended; the timing loop idles
    Paused,
    /// Terminal; no further transitions
    Finished,
}

impl RecordingState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Finished => "finished",
        }
    }

    /// Recording or paused
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Clone, Error)]
#[error("Invalid state transition: cannot {action} while {current_state}")]
pub struct InvalidTransition {
    pub current_state: RecordingState,
    pub action: &'static str,
}

#[derive(Debug, Default)]
struct ControlInner {
    state: RecordingState,
    pause_depth: u32,
}

/// State machine plus pause-depth counter
///
/// State and depth are updated together under one lock so that pause and
/// resume may be called from any task or thread.
///
/// ```text
///   IDLE -> RECORDING (begin, depth == 0)
///   IDLE -> PAUSED    (begin, depth > 0)
///   RECORDING -> PAUSED (pause)
///   PAUSED -> RECORDING (resume, depth reaches 0)
///   RECORDING | PAUSED -> FINISHED (finish)
/// ```
#[derive(Debug, Default)]
pub struct SessionControl {
    inner: Mutex<ControlInner>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    pub fn pause_depth(&self) -> u32 {
        self.inner.lock().pause_depth
    }

    /// Leave idle. Pauses requested before start are honored.
    pub fn begin(&self) -> Result<RecordingState, InvalidTransition> {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Idle {
            return Err(InvalidTransition {
                current_state: inner.state,
                action: "start",
            });
        }
        inner.state = if inner.pause_depth > 0 {
            RecordingState::Paused
        } else {
            RecordingState::Recording
        };
        Ok(inner.state)
    }

    /// Add one pause request. Returns true if this call paused the session.
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == RecordingState::Finished {
            return false;
        }
        inner.pause_depth += 1;
        if inner.state == RecordingState::Recording {
            inner.state = RecordingState::Paused;
            return true;
        }
        false
    }

    /// Release one pause request. Returns true if this call resumed the session.
    ///
    /// A resume without an outstanding pause is ignored.
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == RecordingState::Finished {
            return false;
        }
        if inner.pause_depth == 0 {
            tracing::warn!("resume called without a matching pause");
            return false;
        }
        inner.pause_depth -= 1;
        if inner.pause_depth == 0 && inner.state == RecordingState::Paused {
            inner.state = RecordingState::Recording;
            return true;
        }
        false
    }

    /// Enter the terminal state, returning the state it left
    pub fn finish(&self) -> Result<RecordingState, InvalidTransition> {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() {
            return Err(InvalidTransition {
                current_state: inner.state,
                action: "stop",
            });
        }
        let previous = inner.state;
        inner.state = RecordingState::Finished;
        Ok(previous)
    }
}

/// Read-only session queries available to sink adapters
pub trait SessionView: Send + Sync {
    fn state(&self) -> RecordingState;

    /// The open container writer, if the session saves to file
    fn writer(&self) -> Option<Arc<dyn ContainerWriter>>;

    /// Timestamp of the next video frame
    fn current_time(&self) -> MediaTime;
}

/// State shared between the recorder, its timing loop and its adapters
pub struct SessionShared {
    pub control: SessionControl,
    pub clock: FrameClock,
    writer: RwLock<Option<Arc<dyn ContainerWriter>>>,
}

impl SessionShared {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            control: SessionControl::new(),
            clock: FrameClock::new(frame_rate),
            writer: RwLock::new(None),
        }
    }

    pub fn set_writer(&self, writer: Option<Arc<dyn ContainerWriter>>) {
        *self.writer.write() = writer;
    }
}

impl SessionView for SessionShared {
    fn state(&self) -> RecordingState {
        self.control.state()
    }

    fn writer(&self) -> Option<Arc<dyn ContainerWriter>> {
        self.writer.read().clone()
    }

    fn current_time(&self) -> MediaTime {
        self.clock.current_timestamp()
    }
}

/// Result of a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Frames captured by the timing loop
    pub frames_captured: u64,

    /// Captured duration in milliseconds (frames / fps)
    pub duration_ms: f64,

    /// Final file location, if the session saved to file and finalize succeeded
    pub output_path: Option<PathBuf>,

    /// Whether the file was trimmed to the configured capture duration
    pub trimmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> SessionControl {
        let control = SessionControl::new();
        control.begin().unwrap();
        control
    }

    #[test]
    fn test_new_session_is_idle() {
        let control = SessionControl::new();
        assert_eq!(control.state(), RecordingState::Idle);
        assert_eq!(control.pause_depth(), 0);
    }

    #[test]
    fn test_begin_only_from_idle() {
        let control = recording();
        assert_eq!(control.state(), RecordingState::Recording);

        let err = control.begin().unwrap_err();
        assert_eq!(err.current_state, RecordingState::Recording);
        assert!(err.to_string().contains("cannot start while recording"));
    }

    #[test]
    fn test_nested_pause_needs_balanced_resume() {
        let control = recording();
        assert!(control.pause());
        assert!(!control.pause());
        assert_eq!(control.pause_depth(), 2);

        assert!(!control.resume());
        assert_eq!(control.state(), RecordingState::Paused);

        assert!(control.resume());
        assert_eq!(control.state(), RecordingState::Recording);
    }

    #[test]
    fn test_paused_iff_more_pauses_than_resumes() {
        let control = recording();
        let ops = [true, true, false, true, false, false, true, false];
        let mut balance = 0i32;
        for pause in ops {
            if pause {
                control.pause();
                balance += 1;
            } else {
                control.resume();
                balance -= 1;
            }
            assert_eq!(control.state() == RecordingState::Paused, balance > 0);
        }
    }

    #[test]
    fn test_unmatched_resume_is_ignored() {
        let control = recording();
        assert!(!control.resume());
        assert_eq!(control.pause_depth(), 0);
        assert!(control.pause());
        assert_eq!(control.state(), RecordingState::Paused);
    }

    #[test]
    fn test_pause_before_start_is_honored() {
        let control = SessionControl::new();
        assert!(!control.pause());
        assert_eq!(control.state(), RecordingState::Idle);
        assert_eq!(control.begin().unwrap(), RecordingState::Paused);
        assert!(control.resume());
        assert_eq!(control.state(), RecordingState::Recording);
    }

    #[test]
    fn test_finished_is_terminal() {
        let control = recording();
        control.pause();
        assert_eq!(control.finish().unwrap(), RecordingState::Paused);

        assert!(!control.pause());
        assert!(!control.resume());
        assert!(control.begin().is_err());
        assert!(control.finish().is_err());
        assert_eq!(control.state(), RecordingState::Finished);
    }

    #[test]
    fn test_finish_from_idle_fails() {
        let control = SessionControl::new();
        let err = control.finish().unwrap_err();
        assert_eq!(err.current_state, RecordingState::Idle);
        assert_eq!(err.action, "stop");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RecordingState::Idle.to_string(), "idle");
        assert_eq!(RecordingState::Paused.to_string(), "paused");
        assert_eq!(RecordingState::Finished.to_string(), "finished");
    }
}
