//! Error types for the cue engine

use thiserror::Error;

/// Cue engine error type
///
/// Playback-time failures are never returned from the tick; they are
/// reported through [`crate::Notification::PlaybackError`] instead.
#[derive(Error, Debug)]
pub enum CueError {
    /// Operation on a destroyed or unknown engine object
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Unknown category, variable, cue or bank name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Value outside of the declared range (callers clamp, this is informational)
    #[error("Value {value} out of range [{min}, {max}]")]
    OutOfRange { value: f32, min: f32, max: f32 },

    /// No voice available or instance limit reached under a fail policy
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Loaded bank references something the catalog does not define
    #[error("Malformed catalog: {0}")]
    MalformedCatalog(String),

    /// Wave data read failed
    #[error("Stream I/O error: {0}")]
    StreamIo(#[from] std::io::Error),

    /// Engine configuration could not be parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Variable is read-only for the caller
    #[error("Variable is read-only: {0}")]
    ReadOnly(String),

    /// Argument no operation can accept (NaN, infinity)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for CueError {
    fn from(err: serde_json::Error) -> Self {
        CueError::Config(err.to_string())
    }
}

/// Result type alias
pub type CueResult<T> = Result<T, CueError>;
