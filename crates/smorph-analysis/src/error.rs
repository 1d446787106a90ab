//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Work was cancelled through its [`CancelToken`](smorph_core::CancelToken).
    #[error("Cancelled")]
    Cancelled,

    /// Input can't be analyzed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
