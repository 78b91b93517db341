//! Error types and handling
//!
//! Common error types used across the recorder.

use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("No pending segment to finalize")]
    NoPendingSegment,

    #[error("Recorder is stopped")]
    Stopped,
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
