//! Recording system module
//!
//! This module implements the session engine:
//! - RenderSettings for per-session configuration
//! - FrameClock and the frame/audio streams between producers and sinks
//! - Recorder to run the timing loop and orchestrate the sink adapters

pub mod clock;
pub mod coordinator;
pub mod settings;
pub mod state;
pub mod stream;

pub use clock::FrameClock;
pub use coordinator::{Recorder, RecorderBuilder, RecorderError, RecorderResult, RecordingEvent};
pub use settings::{ConfigError, LiveDestinationSettings, RenderConfig, RenderSettings};
pub use state::{RecordingState, RecordingSummary, SessionControl, SessionView};
pub use stream::{AudioStream, FrameStream, MediaStream, Timed};
