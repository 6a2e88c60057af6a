//! Error types for the WebSocket server
//!
//! Two kinds of failure are kept apart. [`ConnectionError`] is what a caller
//! of `send`/`close` gets back: the connection may already be gone and that
//! is an ordinary outcome. [`ServerError`] covers bootstrap and accept-loop
//! failures. Protocol violations by the peer never surface here; they close
//! the offending connection.

use sockline_core::error::Error;
use std::io;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] Error),

    /// Handshake did not finish in time
    #[error("Handshake timed out after {duration:?}")]
    HandshakeTimeout {
        /// Configured handshake timeout
        duration: std::time::Duration,
    },

    /// Capacity error
    #[error("Connection limit exceeded: {current}/{max}")]
    Capacity {
        /// Live connections
        current: usize,
        /// Configured limit
        max: usize,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid bind address
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    /// Invalid timeout value
    #[error("Invalid timeout value: {0}")]
    InvalidTimeout(String),

    /// Invalid size limit
    #[error("Invalid size limit: {0}")]
    InvalidBufferSize(String),

    /// Invalid connection limit
    #[error("Invalid connection limit: {0}")]
    InvalidLimit(String),
}

/// Recoverable outcome of a send or close request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Connection closed
    #[error("Connection closed")]
    Closed,

    /// The message cannot be sent through this API
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Writing to the underlying stream failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Whether the connection is gone and retrying is pointless
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed | ConnectionError::Transport(_))
    }
}
