//! Transport layer abstraction
//!
//! The accept side of whatever byte stream carries WebSocket traffic. A
//! transport hands out already-connected streams; the upgrade handshake and
//! framing run on top of them unchanged.

use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport trait for abstracting different listener types
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Accept an incoming connection along with the peer address
    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Socket options applied to accepted streams
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { nodelay: true }
    }
}
