//! # Sockline Core
//!
//! Protocol layer for the Sockline WebSocket server engine.
//!
//! This crate knows nothing about connections or tasks. It provides:
//!
//! - Error handling and types
//! - WebSocket frame parsing and generation
//! - Message assembly for fragmented data frames
//! - The server side of the upgrade handshake
//! - Protocol constants and utilities
//! - The transport (listener) abstraction

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Core modules
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
#[cfg(feature = "tokio-runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-runtime")))]
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{CloseCode, Error, Result};
pub use frame::{Frame, FrameConfig};
pub use handshake::{Handshake, HandshakeConfig, HandshakeRequest, HandshakeResponse};
pub use message::{Message, MessageAssembler};
pub use protocol::Opcode;
#[cfg(feature = "tokio-runtime")]
pub use transport::{Transport, TransportConfig};
