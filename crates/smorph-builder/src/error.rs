//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The build was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Encoding a sample failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data model error.
    #[error(transparent)]
    Core(#[from] smorph_core::Error),

    /// Cache file can't be read.
    #[error("Cache format error: {0}")]
    CacheFormat(String),
}

impl Error {
    /// True if the work was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<smorph_analysis::Error> for Error {
    fn from(err: smorph_analysis::Error) -> Self {
        match err {
            smorph_analysis::Error::Cancelled => Error::Cancelled,
            other => Error::Encode(other.to_string()),
        }
    }
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
