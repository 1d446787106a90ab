//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV decoding or encoding error.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Sample data can't be used for this operation.
    #[error("Invalid wav data: {0}")]
    InvalidWavData(String),

    /// Sample index out of range.
    #[error("Sample not found: {0}")]
    SampleNotFound(usize),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
