//! Frame clock
//!
//! The only source of video presentation timestamps. The frame index is
//! advanced exactly once per captured frame; elapsed virtual time is advanced
//! separately by the timing loop so the pacing can be observed without
//! depending on wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::utils::time::MediaTime;

pub struct FrameClock {
    frame_rate: u32,
    frame_index: AtomicU64,
    elapsed_nanos: AtomicU64,
}

impl FrameClock {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            frame_index: AtomicU64::new(0),
            elapsed_nanos: AtomicU64::new(0),
        }
    }

    /// Reset the frame index and virtual elapsed time
    pub fn start(&self) {
        self.frame_index.store(0, Ordering::SeqCst);
        self.elapsed_nanos.store(0, Ordering::SeqCst);
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.frame_index.load(Ordering::SeqCst)
    }

    /// Timestamp of the next frame to be captured
    pub fn current_timestamp(&self) -> MediaTime {
        MediaTime::from_frame(self.frame_count(), self.frame_rate)
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate
    }

    /// Advance virtual elapsed time
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Count one captured frame
    pub fn increment_frame(&self) -> u64 {
        self.frame_index.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_follow_frame_index() {
        let clock = FrameClock::new(30);
        clock.start();
        assert_eq!(clock.current_timestamp(), MediaTime::ZERO);

        for _ in 0..45 {
            clock.increment_frame();
        }
        assert_eq!(clock.frame_count(), 45);
        assert_eq!(clock.current_timestamp(), MediaTime::new(3, 2));
    }

    #[test]
    fn test_start_resets() {
        let clock = FrameClock::new(10);
        clock.increment_frame();
        clock.advance(Duration::from_millis(100));
        clock.start();
        assert_eq!(clock.frame_count(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_advance_is_independent_of_frames() {
        let clock = FrameClock::new(10);
        clock.start();
        clock.advance(clock.frame_duration());
        clock.advance(clock.frame_duration());
        assert_eq!(clock.elapsed(), Duration::from_millis(200));
        assert_eq!(clock.frame_count(), 0);
    }
}
