//! Sockline Server
//!
//! Per-connection WebSocket engine: the upgrade handshake, a read loop that
//! reassembles messages and answers control frames, a send loop fed by a
//! priority queue, and the `Open -> Closing -> Closed` lifecycle that ties
//! them together. [`Server`] adds a TCP accept loop on top.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockline_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> sockline_server::error::Result<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")?
//!         .max_connections(10_000)
//!         .handler(EchoHandler::new())
//!         .build()?;
//!
//!     server.serve().await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Public modules
pub mod logging;

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod outbound;
pub mod server;
pub mod state;
pub mod tcp_transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionHandle, ConnectionMetadata, ConnectionOptions};
pub use error::{ConfigError, ConnectionError, ServerError};
pub use handler::{BoxedHandler, ChannelHandler, ConnectionEvent, EchoHandler, Handler};
pub use manager::{ConnectionManager, ManagerStats};
pub use outbound::{OutboundMessage, OutboundQueue};
pub use server::{Server, ServerBuilder};
pub use state::ConnectionState;
pub use tcp_transport::TcpTransport;
