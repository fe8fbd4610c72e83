//! Live destination collaborator traits

use async_trait::async_trait;
use thiserror::Error;

use crate::recorder::settings::{LiveDestinationSettings, RenderSettings};
use crate::sink::sample::MediaSample;

/// Live publishing errors
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Failed to connect to {uri}: {message}")]
    Connect { uri: String, message: String },

    #[error("Failed to publish: {0}")]
    Publish(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream is closed")]
    Closed,
}

/// One outbound stream to a live server
#[async_trait]
pub trait LiveDestination: Send {
    /// Begin publishing under `stream_key`
    async fn publish(&mut self, stream_key: &str) -> Result<(), LiveError>;

    async fn append(&mut self, sample: &MediaSample) -> Result<(), LiveError>;

    async fn close(&mut self) -> Result<(), LiveError>;
}

/// Opens connections for configured destinations
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    async fn connect(
        &self,
        destination: &LiveDestinationSettings,
        settings: &RenderSettings,
    ) -> Result<Box<dyn LiveDestination>, LiveError>;
}
