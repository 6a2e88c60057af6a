//! WebSocket connection handlers
//!
//! A [`Handler`] subscribes to one or more connections and is told about
//! every received message, every frame written and every state change.
//! Callbacks run on the connection's own tasks and must not block; replying
//! through the [`ConnectionHandle`] only queues the message.

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::outbound::OutboundMessage;
use bytes::Bytes;
use sockline_core::protocol::Opcode;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Trait for observing WebSocket connections
///
/// Every method defaults to a no-op.
pub trait Handler: Send + Sync + 'static {
    /// A complete text message arrived
    fn on_text(&self, connection: &ConnectionHandle, text: &str) {
        let _ = (connection, text);
    }

    /// A complete binary message arrived
    fn on_binary(&self, connection: &ConnectionHandle, data: &Bytes) {
        let _ = (connection, data);
    }

    /// A frame was written to the stream
    fn on_sent(&self, connection: &ConnectionHandle, message: &OutboundMessage) {
        let _ = (connection, message);
    }

    /// The connection moved to `state`
    fn on_state_change(&self, connection: &ConnectionHandle, state: ConnectionState) {
        let _ = (connection, state);
    }
}

/// Shared handler type
pub type BoxedHandler = Arc<dyn Handler>;

/// Echo handler implementation
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }
}

impl Handler for EchoHandler {
    fn on_text(&self, connection: &ConnectionHandle, text: &str) {
        if let Err(e) = connection.send_text(text) {
            crate::log_debug!("connection {} echo dropped: {}", connection.id(), e);
        }
    }

    fn on_binary(&self, connection: &ConnectionHandle, data: &Bytes) {
        if let Err(e) = connection.send_binary(data.clone()) {
            crate::log_debug!("connection {} echo dropped: {}", connection.id(), e);
        }
    }
}

/// Notification republished by [`ChannelHandler`]
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Text message received
    Text {
        /// Connection ID
        id: u64,
        /// Message text
        text: String,
    },
    /// Binary message received
    Binary {
        /// Connection ID
        id: u64,
        /// Message payload
        data: Bytes,
    },
    /// Frame written
    Sent {
        /// Connection ID
        id: u64,
        /// Frame opcode
        opcode: Opcode,
        /// Payload length
        len: usize,
    },
    /// State transition
    StateChanged {
        /// Connection ID
        id: u64,
        /// New state
        state: ConnectionState,
    },
}

/// Forwards every notification to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn publish(&self, event: ConnectionEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl Handler for ChannelHandler {
    fn on_text(&self, connection: &ConnectionHandle, text: &str) {
        self.publish(ConnectionEvent::Text {
            id: connection.id(),
            text: text.to_string(),
        });
    }

    fn on_binary(&self, connection: &ConnectionHandle, data: &Bytes) {
        self.publish(ConnectionEvent::Binary {
            id: connection.id(),
            data: data.clone(),
        });
    }

    fn on_sent(&self, connection: &ConnectionHandle, message: &OutboundMessage) {
        self.publish(ConnectionEvent::Sent {
            id: connection.id(),
            opcode: message.opcode(),
            len: message.payload().len(),
        });
    }

    fn on_state_change(&self, connection: &ConnectionHandle, state: ConnectionState) {
        self.publish(ConnectionEvent::StateChanged {
            id: connection.id(),
            state,
        });
    }
}
