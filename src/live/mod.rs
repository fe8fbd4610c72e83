//! Live publishing
//!
//! Mirrors every encodable sample to zero or more live destinations,
//! independently of the file-saving path.

pub mod destination;
pub mod fanout;
pub mod ffmpeg;

pub use destination::{DestinationConnector, LiveDestination, LiveError};
pub use fanout::{DestinationReport, LiveFanout};
pub use ffmpeg::{FfmpegConnector, FfmpegPublisher};
