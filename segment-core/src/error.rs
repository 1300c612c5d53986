//! Error types for segment-core

use thiserror::Error;

/// Main error type for the segment-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Bad builder input (empty required string, missing required field)
    #[error("validation error: {0}")]
    Validation(String),

    /// Neither userId nor anonymousId was provided
    #[error("either userId or anonymousId is required")]
    Identity,

    /// Encoded message exceeds the per-message size limit
    #[error("message is {size} bytes, must be at most {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Writing to the durable queue failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Network or HTTP failure while uploading a batch
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized wire payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The transporter worker has shut down
    #[error("transporter is closed")]
    Closed,
}

impl Error {
    /// Returns true for errors that leave the durable queue intact and are
    /// worth retrying on the next flush.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type alias for segment-core
pub type Result<T> = std::result::Result<T, Error>;
