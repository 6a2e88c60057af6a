//! Prelude module with common imports
//!
//! `use sockline_server::prelude::*;` brings in everything needed to run a
//! server and write handlers.

// Server types
pub use crate::config::ServerConfig;
pub use crate::connection::{Connection, ConnectionHandle, ConnectionMetadata, ConnectionState};
pub use crate::handler::{BoxedHandler, ChannelHandler, ConnectionEvent, EchoHandler, Handler};
pub use crate::manager::ConnectionManager;
pub use crate::outbound::OutboundMessage;
pub use crate::server::{Server, ServerBuilder};

// Re-export core types
pub use sockline_core::prelude::*;
