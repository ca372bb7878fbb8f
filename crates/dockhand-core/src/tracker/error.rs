//! Error types for the issue tracker layer.

/// Errors returned by issue tracker backends.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote API answered with an error status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid repository id: {0}")]
    InvalidRepository(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::Http(err.to_string())
    }
}

/// Result type for tracker operations.
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
