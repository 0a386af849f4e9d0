/*!
 * Error types for the vntl application.
 *
 * This module contains custom error types for different parts of the application,
 * using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

/// Errors raised by the tabular store
#[derive(Error, Debug)]
pub enum StoreError {
    /// File missing or unreadable
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying error text
        message: String,
    },

    /// Headers or key column are not what the caller asked for
    #[error("Malformed store: {0}")]
    MalformedStore(String),

    /// Duplicate or empty keys in the first column
    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),

    /// Appending would introduce a second row for the same key
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Keys must be non-empty and not only whitespace
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// A row/column address that does not exist or cannot be parsed
    #[error("Invalid cell address: {0}")]
    InvalidAddress(String),

    /// Merging stores that describe different sheets
    #[error("Sheet name mismatch: '{left}' vs '{right}'")]
    SheetMismatch {
        /// Sheet name of the receiving store
        left: String,
        /// Sheet name of the other store
        right: String,
    },

    /// File extension the store cannot read or write
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Container or markup could not be decoded
    #[error("Failed to decode {path}: {message}")]
    Decode {
        /// Path being decoded
        path: String,
        /// Underlying error text
        message: String,
    },
}

impl StoreError {
    /// Build an I/O error for a path
    pub fn io(path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: error.to_string(),
        }
    }

    /// Build a decode error for a path
    pub fn decode(path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        Self::Decode {
            path: path.as_ref().display().to_string(),
            message: error.to_string(),
        }
    }
}

/// Errors that can occur when talking to a translation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The construction probe failed
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded the read timeout
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Non-2xx status or a body that could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine returned a different number of results than inputs
    #[error("Batch length mismatch: sent {expected}, received {received}")]
    BatchMismatch {
        /// Number of inputs sent
        expected: usize,
        /// Number of results received
        received: usize,
    },

    /// Error with authentication
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Quota or rate limit exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The engine cannot perform the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Classify a transport error from reqwest
    pub fn from_transport(error: reqwest::Error, timeout_secs: u64) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout_secs)
        } else if error.is_connect() {
            Self::Connection(error.to_string())
        } else if error.is_decode() {
            Self::Protocol(error.to_string())
        } else {
            Self::Connection(error.to_string())
        }
    }

    /// Whether the orchestrator may leave the cell absent and move on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Protocol(_) | Self::BatchMismatch { .. } | Self::Connection(_)
        )
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// File missing or unreadable
    #[error("File error: {0}")]
    Io(String),

    /// Decoding failed under the strict handler
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Headers or key column wrong
    #[error("Malformed store: {0}")]
    MalformedStore(String),

    /// Duplicate or empty keys that survived a rebuild
    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),

    /// Unknown setting, unknown engine, unresolved language
    #[error("Configuration error: {0}")]
    Config(String),

    /// Probe failed at startup
    #[error("Engine unreachable: {0}")]
    EngineUnreachable(String),

    /// Error from an engine outside the per-row loop
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Any other store error
    #[error("Store error: {0}")]
    Store(StoreError),

    /// The run was interrupted by the user
    #[error("Cancelled by user")]
    Cancelled,
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Io { path, message } => Self::Io(format!("{}: {}", path, message)),
            StoreError::MalformedStore(message) => Self::MalformedStore(message),
            StoreError::CacheCorrupt(message) => Self::CacheCorrupt(message),
            other => Self::Store(other),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
