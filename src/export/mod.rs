//! Output container backends
//!
//! Encodes captured frames and mixed audio into the session's output file
//! and trims finished files to the configured capture duration.

pub mod ffmpeg;

pub use ffmpeg::{AudioTimeline, FfmpegBackend, FfmpegContainerWriter};
