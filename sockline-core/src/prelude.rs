//! Prelude module for Sockline Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::error::{CloseCode, Error, Result};
pub use crate::frame::{Frame, FrameConfig};
pub use crate::message::{Message, MessageAssembler};
pub use crate::protocol::Opcode;

// Re-export commonly used external dependencies
pub use bytes::{Bytes, BytesMut};

// Feature-gated re-exports
#[cfg(feature = "tokio-runtime")]
pub use crate::transport::Transport;

#[cfg(feature = "tokio-runtime")]
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
