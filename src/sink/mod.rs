//! Sink adapters
//!
//! Consumers of the frame and audio streams that feed the container writer
//! and the live fan-out.

pub mod audio;
pub mod sample;
pub mod video;
pub mod writer;

use std::sync::atomic::{AtomicU64, Ordering};

pub use audio::AudioSink;
pub use sample::{MediaSample, PixelBuffer};
pub use video::VideoSink;
pub use writer::{ContainerBackend, ContainerWriter, TrackKind, WriterError, WriterStatus};

/// Per-adapter item counters
#[derive(Debug, Default)]
pub struct SinkStats {
    received: AtomicU64,
    appended: AtomicU64,
    dropped: AtomicU64,
}

impl SinkStats {
    fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_appended(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Items taken off the stream
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Items accepted by the writer
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Items the writer couldn't take
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
