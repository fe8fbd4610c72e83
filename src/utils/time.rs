//! Rational media time
//!
//! Presentation timestamps are kept as `value / timescale` so that long
//! sessions never accumulate floating point drift. A video frame at index `n`
//! recorded at `fps` frames per second is simply `MediaTime::new(n, fps)`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// A presentation timestamp expressed as a rational number of seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a new time of `value / timescale` seconds.
    ///
    /// A zero timescale is treated as 1 so that the value stays meaningful.
    pub fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Time of frame `index` at `fps` frames per second.
    pub fn from_frame(index: u64, fps: u32) -> Self {
        Self::new(index as i64, fps)
    }

    /// Convert to the given timescale, rounding to the nearest unit.
    pub fn rescale(&self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let half = den / 2;
        let rounded = if scaled >= 0 {
            (scaled + half) / den
        } else {
            (scaled - half) / den
        };
        Self::new(rounded as i64, timescale)
    }

    /// Seconds as a float, for logging and ffmpeg arguments only.
    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Wall-clock duration equivalent (negative times clamp to zero).
    pub fn to_duration(&self) -> Duration {
        if self.value <= 0 {
            return Duration::ZERO;
        }
        let nanos = self.value as u128 * 1_000_000_000 / self.timescale as u128;
        Duration::from_nanos(nanos as u64)
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (l, r) = self.cross(other);
        l == r
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (l, r) = self.cross(other);
        l.cmp(&r)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.as_secs_f64())
    }
}
