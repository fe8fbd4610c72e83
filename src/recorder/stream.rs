//! Frame and audio streams
//!
//! Unbounded single-consumer queues between real-time producers (the timing
//! loop, audio taps) and the sink adapters. Enqueue never blocks; once a
//! stream is finished further items are dropped and the consumer drains what
//! is buffered before its `recv` returns `None`.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::audio::PcmBuffer;
use crate::capture::CapturedImage;
use crate::utils::time::MediaTime;

/// An item plus its presentation timestamp
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub item: T,
    pub time: MediaTime,
}

/// Captured video frame
pub type VideoFrame = Timed<CapturedImage>;

/// Tapped audio block
pub type AudioSample = Timed<PcmBuffer>;

pub struct MediaStream<T> {
    sender: Mutex<Option<UnboundedSender<Timed<T>>>>,
    receiver: Mutex<Option<UnboundedReceiver<Timed<T>>>>,
}

pub type FrameStream = MediaStream<CapturedImage>;
pub type AudioStream = MediaStream<PcmBuffer>;

impl<T> MediaStream<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Queue an item; returns false if the stream is already finished
    pub fn enqueue(&self, item: T, time: MediaTime) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(Timed { item, time }).is_ok(),
            None => false,
        }
    }

    /// Signal that no more items will arrive
    pub fn finish(&self) {
        self.sender.lock().take();
    }

    pub fn is_finished(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Hand the consuming end to the single consumer
    ///
    /// Returns `None` once the receiver has been taken.
    pub fn take_consumer(&self) -> Option<UnboundedReceiver<Timed<T>>> {
        self.receiver.lock().take()
    }
}

impl<T> Default for MediaStream<T> {
    fn default() -> Self {
        Self::new()
    }
}
