//! FFmpeg RTMP publisher
//!
//! Pipes raw RGBA frames into an ffmpeg child process which encodes H.264
//! and pushes FLV to `uri/stream_key`. Only the video track is published;
//! audio samples are accepted and skipped.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::{timeout, Duration};

use super::destination::{DestinationConnector, LiveDestination, LiveError};
use crate::recorder::settings::{LiveDestinationSettings, RenderSettings};
use crate::sink::sample::MediaSample;

/// How long `close` waits for ffmpeg to flush before killing it
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects destinations by spawning one ffmpeg publisher each
#[derive(Debug, Clone, Default)]
pub struct FfmpegConnector;

#[async_trait]
impl DestinationConnector for FfmpegConnector {
    async fn connect(
        &self,
        destination: &LiveDestinationSettings,
        settings: &RenderSettings,
    ) -> Result<Box<dyn LiveDestination>, LiveError> {
        if destination.uri.is_empty() {
            return Err(LiveError::Connect {
                uri: destination.uri.clone(),
                message: "empty URI".to_string(),
            });
        }
        Ok(Box::new(FfmpegPublisher {
            uri: destination.uri.trim_end_matches('/').to_string(),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            bit_rate: destination.bit_rate.unwrap_or_else(|| settings.default_bitrate()),
            profile: destination
                .profile_level
                .clone()
                .unwrap_or_else(|| "main".to_string()),
            keyframe_interval: settings.default_keyframe_interval(),
            process: None,
            stdin: None,
        }))
    }
}

pub struct FfmpegPublisher {
    uri: String,
    width: u32,
    height: u32,
    fps: u32,
    bit_rate: u32,
    profile: String,
    keyframe_interval: u32,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegPublisher {
    fn build_args(&self, url: &str) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", self.width, self.height),
            "-r".to_string(),
            self.fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-profile:v".to_string(),
            self.profile.clone(),
            "-b:v".to_string(),
            self.bit_rate.to_string(),
            "-g".to_string(),
            self.keyframe_interval.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "flv".to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl LiveDestination for FfmpegPublisher {
    async fn publish(&mut self, stream_key: &str) -> Result<(), LiveError> {
        let url = format!("{}/{}", self.uri, stream_key);
        let mut child = Command::new("ffmpeg")
            .args(self.build_args(&url))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LiveError::Connect {
                uri: self.uri.clone(),
                message: format!("failed to start ffmpeg: {}", e),
            })?;

        self.stdin = child.stdin.take();
        if self.stdin.is_none() {
            return Err(LiveError::Publish("ffmpeg stdin unavailable".to_string()));
        }
        self.process = Some(child);
        Ok(())
    }

    async fn append(&mut self, sample: &MediaSample) -> Result<(), LiveError> {
        let MediaSample::Video { frame, .. } = sample else {
            return Ok(());
        };
        let stdin = self.stdin.as_mut().ok_or(LiveError::Closed)?;
        if frame.width != self.width || frame.height != self.height {
            return Err(LiveError::Publish(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        stdin.write_all(&frame.data).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LiveError> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        let Some(mut child) = self.process.take() else {
            return Ok(());
        };
        match timeout(CLOSE_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(LiveError::Publish(format!("ffmpeg exited with {}", status))),
            Ok(Err(e)) => Err(LiveError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(LiveError::Publish("ffmpeg did not exit in time".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_destination_parameters() {
        let settings = RenderSettings::new("live", 1280, 720, 30);
        let mut destination = LiveDestinationSettings::new("rtmp://example.com/app/", "key");
        destination.bit_rate = Some(2_500_000);

        let publisher = FfmpegPublisher {
            uri: destination.uri.trim_end_matches('/').to_string(),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            bit_rate: 2_500_000,
            profile: "main".to_string(),
            keyframe_interval: settings.default_keyframe_interval(),
            process: None,
            stdin: None,
        };
        let args = publisher.build_args("rtmp://example.com/app/key");
        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "1280x720"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "2500000"));
        assert!(args.windows(2).any(|w| w[0] == "-g" && w[1] == "60"));
        assert_eq!(args.last().map(String::as_str), Some("rtmp://example.com/app/key"));

        assert!(FfmpegConnector.connect(&destination, &settings).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_uri_is_rejected() {
        let settings = RenderSettings::new("live", 16, 16, 30);
        let destination = LiveDestinationSettings::new("", "key");
        assert!(matches!(
            FfmpegConnector.connect(&destination, &settings).await,
            Err(LiveError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_before_publish_is_closed() {
        let settings = RenderSettings::new("live", 1, 1, 30);
        let destination = LiveDestinationSettings::new("rtmp://x", "k");
        let mut publisher = FfmpegConnector.connect(&destination, &settings).await.unwrap();
        let sample = MediaSample::Video {
            frame: crate::sink::sample::PixelBuffer::filled(1, 1, [0; 4]),
            time: crate::utils::time::MediaTime::ZERO,
        };
        assert!(matches!(publisher.append(&sample).await, Err(LiveError::Closed)));
        assert!(publisher.close().await.is_ok());
    }
}
