//! Error types for chatterbox.

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Common error type for chatterbox.
#[derive(Error, Debug)]
pub enum ChatterboxError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant. Persistence is
    /// best-effort on the broadcast path, so callers there log and continue.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed record on the wire.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication error (bad credentials, banned username).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for ChatterboxError {
    fn from(e: sqlx::Error) -> Self {
        ChatterboxError::Database(e.to_string())
    }
}

/// Result type alias for chatterbox operations.
pub type Result<T> = std::result::Result<T, ChatterboxError>;
