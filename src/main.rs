//! Records a moving test pattern.
//!
//! Usage: `framecast-demo [settings.json]`

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framecast::recorder::RecordingEvent;
use framecast::utils::error::{AppError, ErrorResponse};
use framecast::{CapturedImage, Recorder, RenderSettings, RenderTarget};

/// Vertical bar sweeping across a gradient
struct TestPattern {
    frame: AtomicU64,
}

impl TestPattern {
    fn render(&self, target: RenderTarget) -> Option<CapturedImage> {
        let (width, height) = target.pixel_size();
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        let bar = (frame * 8 % width as u64) as u32;

        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                if x.abs_diff(bar) < 4 {
                    data.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    let r = (x * 255 / width) as u8;
                    let g = (y * 255 / height) as u8;
                    data.extend_from_slice(&[r, g, 128, 255]);
                }
            }
        }
        Some(CapturedImage::rgba(width, height, data))
    }
}

fn load_settings() -> Result<RenderSettings, AppError> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => Ok(RenderSettings::load(&path)?),
        None => Ok(RenderSettings::new("framecast_demo", 640, 360, 30)
            .with_capture_duration(Duration::from_secs(5))),
    }
}

async fn record() -> Result<(), AppError> {
    let settings = load_settings()?;
    settings.validate()?;

    let pattern = Arc::new(TestPattern {
        frame: AtomicU64::new(0),
    });
    let renderer = move |target: RenderTarget| pattern.render(target);
    let recorder = Recorder::new(settings, Arc::new(renderer));

    let mut events = recorder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecordingEvent::Progress { frames } => tracing::info!("{} frames captured", frames),
                RecordingEvent::Error(message) => tracing::warn!("{}", message),
                RecordingEvent::Finished(_) => break,
                _ => {}
            }
        }
    });

    recorder.start().await?;

    // Without a capture duration, record until Ctrl-C
    if recorder.settings().capture_duration.is_none() {
        tokio::signal::ctrl_c().await?;
        recorder.stop()?;
    }

    let summary = recorder.wait_for_completion().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    framecast::init_logging();

    if let Err(error) = record().await {
        let response = ErrorResponse::from(error);
        eprintln!("{}", serde_json::to_string(&response)?);
        anyhow::bail!("{}", response.message);
    }
    Ok(())
}
