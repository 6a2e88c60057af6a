//! TCP transport implementation
//!
//! Plain TCP listener producing [`TcpStream`]s for the upgrade handshake.

use async_trait::async_trait;
use sockline_core::transport::{Transport, TransportConfig};
use sockline_core::Result;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a new TCP transport bound to the given address
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                crate::log_warn!("failed to set TCP_NODELAY for {}: {}", addr, e);
            }
        }
        Ok((stream, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_and_accept() {
        let transport = TcpTransport::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            TransportConfig::default(),
        )
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let (mut stream, peer) = transport.accept().await.unwrap();
        assert!(peer.ip().is_loopback());
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();
    }
}
