//! Server configuration
//!
//! This module provides configuration options for the WebSocket server.

use crate::error::{ConfigError, Result};
use sockline_core::frame::FrameConfig;
use sockline_core::handshake::HandshakeConfig;
use sockline_core::protocol::constants;
use sockline_core::transport::TransportConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes
    pub max_frame_size: usize,
    /// Maximum reassembled message size in bytes
    pub max_message_size: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// How long a locally initiated close waits for the peer's reply
    pub close_timeout: Duration,
    /// Echo the request path as the subprotocol when the client offers none
    pub echo_path_as_protocol: bool,
    /// Extra headers to send in handshake response
    pub extra_headers: Vec<(String, String)>,
    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 10_000,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: constants::DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: constants::DEFAULT_CLOSE_TIMEOUT,
            echo_path_as_protocol: true,
            extra_headers: Vec::new(),
            nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_connections must be greater than 0".to_string(),
            )
            .into());
        }

        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidBufferSize(
                "max_frame_size must be greater than 0".to_string(),
            )
            .into());
        }

        if self.max_message_size < self.max_frame_size {
            return Err(ConfigError::InvalidBufferSize(
                "max_message_size must be greater than or equal to max_frame_size".to_string(),
            )
            .into());
        }

        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        if self.close_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "close_timeout must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Handshake settings derived from this configuration
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            echo_path_as_protocol: self.echo_path_as_protocol,
            extra_headers: self.extra_headers.clone(),
            max_header_size: constants::MAX_HEADER_SIZE,
        }
    }

    /// Limits applied to inbound frames
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig::server(self.max_frame_size)
    }

    /// Socket options for accepted streams
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            nodelay: self.nodelay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(config.echo_path_as_protocol);
    }

    #[test]
    fn test_server_config_validation() {
        let mut config = ServerConfig::default();
        config.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ServerError::Config(ConfigError::InvalidLimit(_)))
        ));

        config.max_connections = 1000;
        config.max_frame_size = 0;
        assert!(config.validate().is_err());

        config.max_frame_size = 1024;
        config.max_message_size = 512;
        assert!(config.validate().is_err());

        config.max_message_size = 1024;
        config.close_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ServerError::Config(ConfigError::InvalidTimeout(_)))
        ));
    }

    #[test]
    fn test_derived_configs() {
        let config = ServerConfig {
            max_frame_size: 4096,
            echo_path_as_protocol: false,
            ..Default::default()
        };
        assert_eq!(config.frame_config(), FrameConfig::server(4096));
        assert!(!config.handshake_config().echo_path_as_protocol);
    }
}
