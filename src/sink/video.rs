//! Video sink adapter
//!
//! Drains the frame stream, converts each captured image to an output-sized
//! pixel buffer, appends it to the writer's video track when saving and
//! mirrors it to the live fan-out.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::sample::{MediaSample, PixelBuffer};
use super::writer::{TrackKind, WriterStatus};
use super::SinkStats;
use crate::capture::CapturedImage;
use crate::live::LiveFanout;
use crate::recorder::state::SessionView;
use crate::recorder::stream::VideoFrame;
use crate::utils::time::MediaTime;

pub struct VideoSink {
    session: Arc<dyn SessionView>,
    live: Arc<LiveFanout>,
    width: u32,
    height: u32,
    save_video_file: bool,
    stats: Arc<SinkStats>,
}

impl VideoSink {
    pub fn new(
        session: Arc<dyn SessionView>,
        live: Arc<LiveFanout>,
        width: u32,
        height: u32,
        save_video_file: bool,
    ) -> Self {
        Self {
            session,
            live,
            width,
            height,
            save_video_file,
            stats: Arc::new(SinkStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }

    /// Convert, append and mirror one frame
    ///
    /// A frame the writer can't take right now is dropped, not retried.
    pub fn process_frame(&self, image: &CapturedImage, time: MediaTime) {
        self.stats.record_received();

        let Some(frame) = PixelBuffer::from_image(image, self.width, self.height) else {
            tracing::trace!("Dropping malformed frame at {}", time);
            self.stats.record_dropped();
            return;
        };

        if self.save_video_file {
            self.append_to_writer(&frame, time);
        }

        self.live.append_sample(&MediaSample::Video { frame, time });
    }

    fn append_to_writer(&self, frame: &PixelBuffer, time: MediaTime) {
        let Some(writer) = self.session.writer() else {
            self.stats.record_dropped();
            return;
        };
        if writer.status() != WriterStatus::Writing || !writer.is_ready_for_more(TrackKind::Video) {
            tracing::trace!("Video input not ready, dropping frame at {}", time);
            self.stats.record_dropped();
            return;
        }
        match writer.append_video(frame, time) {
            Ok(()) => self.stats.record_appended(),
            Err(e) => {
                tracing::trace!("Failed to append frame at {}: {}", time, e);
                self.stats.record_dropped();
            }
        }
    }

    /// Consume the frame stream until it is finished and drained
    pub fn spawn(self, mut frames: UnboundedReceiver<VideoFrame>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                self.process_frame(&frame.item, frame.time);
            }
            tracing::debug!(
                "Video sink drained ({} appended, {} dropped)",
                self.stats.appended(),
                self.stats.dropped()
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmBuffer;
    use crate::live::{DestinationConnector, LiveDestination, LiveError};
    use crate::recorder::settings::{LiveDestinationSettings, RenderSettings};
    use crate::recorder::state::RecordingState;
    use crate::recorder::stream::FrameStream;
    use crate::sink::writer::{ContainerWriter, WriterError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct TestWriter {
        frames: Mutex<Vec<(MediaTime, usize)>>,
        busy: AtomicBool,
    }

    #[async_trait]
    impl ContainerWriter for TestWriter {
        fn status(&self) -> WriterStatus {
            WriterStatus::Writing
        }

        fn is_ready_for_more(&self, _track: TrackKind) -> bool {
            !self.busy.load(Ordering::SeqCst)
        }

        fn append_video(&self, frame: &PixelBuffer, time: MediaTime) -> Result<(), WriterError> {
            self.frames.lock().push((time, frame.data.len()));
            Ok(())
        }

        fn append_audio(&self, _buffer: &PcmBuffer, _time: MediaTime) -> Result<(), WriterError> {
            Ok(())
        }

        async fn finish_writing(&self) -> Result<(), WriterError> {
            Ok(())
        }
    }

    struct TestSession {
        writer: Arc<TestWriter>,
    }

    impl SessionView for TestSession {
        fn state(&self) -> RecordingState {
            RecordingState::Recording
        }

        fn writer(&self) -> Option<Arc<dyn ContainerWriter>> {
            Some(self.writer.clone() as Arc<dyn ContainerWriter>)
        }

        fn current_time(&self) -> MediaTime {
            MediaTime::ZERO
        }
    }

    struct NoConnector;

    #[async_trait]
    impl DestinationConnector for NoConnector {
        async fn connect(
            &self,
            destination: &LiveDestinationSettings,
            _settings: &RenderSettings,
        ) -> Result<Box<dyn LiveDestination>, LiveError> {
            Err(LiveError::Connect {
                uri: destination.uri.clone(),
                message: "offline".into(),
            })
        }
    }

    fn sink(save: bool) -> (VideoSink, Arc<TestWriter>) {
        let writer = Arc::new(TestWriter::default());
        let session = Arc::new(TestSession {
            writer: writer.clone(),
        });
        let live = Arc::new(LiveFanout::new(
            Arc::new(RenderSettings::new("test", 2, 2, 10)),
            Arc::new(NoConnector),
        ));
        (VideoSink::new(session, live, 2, 2, save), writer)
    }

    fn image() -> CapturedImage {
        CapturedImage::rgba(4, 4, vec![255; 64])
    }

    #[test]
    fn test_frames_are_resized_and_appended() {
        let (sink, writer) = sink(true);
        sink.process_frame(&image(), MediaTime::from_frame(0, 10));
        sink.process_frame(&image(), MediaTime::from_frame(1, 10));

        let frames = writer.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].1, 16);
        assert_eq!(frames[1].0, MediaTime::from_frame(1, 10));
    }

    #[test]
    fn test_busy_writer_drops_frame() {
        let (sink, writer) = sink(true);
        writer.busy.store(true, Ordering::SeqCst);
        sink.process_frame(&image(), MediaTime::ZERO);
        writer.busy.store(false, Ordering::SeqCst);
        sink.process_frame(&image(), MediaTime::from_frame(1, 10));

        assert_eq!(writer.frames.lock().len(), 1);
        let stats = sink.stats();
        assert_eq!(stats.received(), 2);
        assert_eq!(stats.appended(), 1);
        assert_eq!(stats.dropped(), 1);
    }

    #[test]
    fn test_not_saving_skips_writer() {
        let (sink, writer) = sink(false);
        sink.process_frame(&image(), MediaTime::ZERO);
        assert!(writer.frames.lock().is_empty());
        assert_eq!(sink.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn test_drains_stream_in_order() {
        let (sink, writer) = sink(true);
        let stream = FrameStream::new();
        let handle = sink.spawn(stream.take_consumer().unwrap());
        for i in 0..10 {
            stream.enqueue(image(), MediaTime::from_frame(i, 10));
        }
        stream.finish();
        handle.await.unwrap();

        let times: Vec<MediaTime> = writer.frames.lock().iter().map(|f| f.0).collect();
        let expected: Vec<MediaTime> = (0..10).map(|i| MediaTime::from_frame(i, 10)).collect();
        assert_eq!(times, expected);
    }
}
