//! Error types and handling
//!
//! Umbrella error over the per-component errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AudioError;
use crate::live::LiveError;
use crate::recorder::{ConfigError, RecorderError};
use crate::sink::WriterError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecorderError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Live error: {0}")]
    Live(#[from] LiveError),
}

/// Machine-readable error report
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Writer(_) => "WRITER_ERROR",
            AppError::Audio(_) => "AUDIO_ERROR",
            AppError::Live(_) => "LIVE_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecordingState;

    #[test]
    fn test_error_response_codes() {
        let error: AppError = RecorderError::NotRecording {
            state: RecordingState::Finished,
        }
        .into();
        let response = ErrorResponse::from(error);
        assert_eq!(response.code, "RECORDING_ERROR");
        assert!(response.message.contains("finished"));

        let error: AppError = ConfigError::Invalid {
            key: "fps".into(),
            message: "must be positive".into(),
        }
        .into();
        assert_eq!(ErrorResponse::from(error).code, "CONFIG_ERROR");
    }
}
