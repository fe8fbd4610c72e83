//! Framecast - off-screen frame capture, muxing and live publishing.
//!
//! A [`Recorder`] pulls frames from a [`Renderer`] at a fixed rate, stamps
//! them with presentation timestamps and feeds them, together with any
//! played or pushed audio, to an output container and to live destinations.

pub mod audio;
pub mod capture;
pub mod export;
pub mod live;
pub mod recorder;
pub mod sink;
pub mod utils;

pub use capture::{CapturedImage, RenderTarget, Renderer};
pub use recorder::{
    LiveDestinationSettings, Recorder, RecorderError, RecordingEvent, RecordingState,
    RecordingSummary, RenderSettings,
};
pub use utils::MediaTime;

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static LOGGING: Once = Once::new();

/// Install the tracing subscriber
///
/// Honors `RUST_LOG`; defaults to `framecast=debug`. Only the first call has
/// any effect.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let result = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "framecast=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        if result.is_ok() {
            tracing::info!("Starting Framecast v{}", env!("CARGO_PKG_VERSION"));
        }
    });
}
