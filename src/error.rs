//! Error types for the analytics streaming pipeline.

use thiserror::Error;

use crate::dispatch::ConnectionId;

/// Result type alias for analytics operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for server, client and configuration operations
#[derive(Debug, Error)]
pub enum Error {
    /// Unparseable or unknown control message
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown connection id
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Connection level failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server lifecycle error
    #[error("Server error: {0}")]
    Server(String),

    /// WebSocket client error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Errors scoped to one connection; never fatal to the process
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::ConnectionNotFound(_)
                | Error::Connection(_)
                | Error::WebSocket(_)
        )
    }
}
