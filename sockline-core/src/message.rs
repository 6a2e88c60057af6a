//! Message handling for Sockline
//!
//! A [`Message`] is a complete application payload, text or binary, as seen by
//! the consumer. Inbound data frames are turned into messages by the
//! [`MessageAssembler`], which stitches fragmented sequences back together.

use crate::error::{MessageError, Result};
use crate::frame::Frame;
use crate::protocol::Opcode;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Represents a complete WebSocket data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Bytes),
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Opcode this message travels under
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    /// Get the message payload as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Get the message payload as bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert message to a single unfragmented frame
    pub fn to_frame(&self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(Bytes::copy_from_slice(text.as_bytes())),
            Message::Binary(data) => Frame::binary(data.clone()),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => write!(f, "Text({})", text),
            Message::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
        }
    }
}

/// Message assembler for fragmented messages
///
/// Only data frames are fed in here; control frames are handled by the
/// connection and never touch the buffer.
#[derive(Debug)]
pub struct MessageAssembler {
    /// Buffer for assembling fragmented messages
    buffer: BytesMut,
    /// Opcode of the first frame of the sequence in progress
    opcode: Option<Opcode>,
    /// Upper bound on a reassembled message
    max_message_size: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(crate::protocol::constants::DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageAssembler {
    /// Create a new message assembler
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            max_message_size,
        }
    }

    /// Feed a data frame and try to assemble a complete message.
    ///
    /// Returns `Ok(None)` while a fragmented sequence is still open. Any
    /// error leaves the assembler reset.
    pub fn feed_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        let result = self.feed(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn feed(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode == Opcode::Continuation {
            let Some(opcode) = self.opcode else {
                return Err(MessageError::UnexpectedContinuation.into());
            };
            self.append(&frame.payload)?;
            if !frame.fin {
                return Ok(None);
            }
            let payload = self.buffer.split().freeze();
            self.reset();
            return Self::complete(opcode, payload).map(Some);
        }

        // Text or Binary always starts a new message; a stale partial
        // sequence is dropped.
        self.reset();
        if !frame.fin {
            self.opcode = Some(frame.opcode);
            self.append(&frame.payload)?;
            return Ok(None);
        }

        if frame.payload.len() > self.max_message_size {
            return Err(MessageError::TooLarge {
                size: frame.payload.len(),
                max: self.max_message_size,
            }
            .into());
        }
        Self::complete(frame.opcode, frame.payload).map(Some)
    }

    fn append(&mut self, payload: &[u8]) -> Result<()> {
        let size = self.buffer.len() + payload.len();
        if size > self.max_message_size {
            return Err(MessageError::TooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }
        self.buffer.extend_from_slice(payload);
        Ok(())
    }

    fn complete(opcode: Opcode, payload: Bytes) -> Result<Message> {
        match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| MessageError::InvalidUtf8)?;
                Ok(Message::Text(text))
            }
            _ => Ok(Message::Binary(payload)),
        }
    }

    /// Reset the assembler state
    fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
    }

    /// Check if currently assembling a message
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Get the number of bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the assembler
    pub fn clear(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_text_message() {
        let msg = Message::text("hello");
        assert_eq!(msg.opcode(), Opcode::Text);
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn test_binary_message() {
        let data = vec![1, 2, 3, 4];
        let msg = Message::binary(data.clone());
        assert_eq!(msg.opcode(), Opcode::Binary);
        assert_eq!(msg.as_bytes(), &data[..]);
        assert_eq!(msg.as_text(), None);
    }

    #[test]
    fn test_message_display() {
        assert_eq!(Message::text("hello").to_string(), "Text(hello)");
        assert_eq!(Message::binary(vec![1, 2, 3]).to_string(), "Binary(3 bytes)");
    }

    #[test]
    fn test_three_fragment_text() {
        let mut assembler = MessageAssembler::default();

        let first = Frame::text("Hel").fin(false);
        let middle = Frame::continuation("lo, ").fin(false);
        let last = Frame::continuation("world!");

        assert_eq!(assembler.feed_frame(first).unwrap(), None);
        assert!(assembler.is_assembling());
        assert_eq!(assembler.feed_frame(middle).unwrap(), None);
        assert_eq!(assembler.buffered_bytes(), 7);

        let msg = assembler.feed_frame(last).unwrap();
        assert_eq!(msg, Some(Message::text("Hello, world!")));
        assert!(!assembler.is_assembling());
        assert_eq!(assembler.buffered_bytes(), 0);
    }

    #[test]
    fn test_single_frame_messages() {
        let mut assembler = MessageAssembler::default();

        let msg = assembler.feed_frame(Frame::binary(vec![9u8, 8, 7])).unwrap();
        assert_eq!(msg, Some(Message::binary(vec![9u8, 8, 7])));

        let msg = assembler.feed_frame(Frame::text("")).unwrap();
        assert_eq!(msg, Some(Message::text("")));
    }

    #[test]
    fn test_fragmented_binary_keeps_first_opcode() {
        let mut assembler = MessageAssembler::default();
        assembler.feed_frame(Frame::binary(vec![0xff]).fin(false)).unwrap();
        let msg = assembler.feed_frame(Frame::continuation(vec![0xfe])).unwrap();
        assert_eq!(msg, Some(Message::binary(vec![0xffu8, 0xfe])));
    }

    #[test]
    fn test_new_data_frame_restarts_open_sequence() {
        let mut assembler = MessageAssembler::default();
        assembler.feed_frame(Frame::text("stale").fin(false)).unwrap();

        // A non-final Binary begins a fresh sequence with its own opcode.
        assembler.feed_frame(Frame::binary(vec![1u8]).fin(false)).unwrap();
        assert_eq!(assembler.buffered_bytes(), 1);
        let msg = assembler.feed_frame(Frame::continuation(vec![2u8])).unwrap();
        assert_eq!(msg, Some(Message::binary(vec![1u8, 2])));

        // A final Text mid-sequence is delivered on its own.
        assembler.feed_frame(Frame::text("stale").fin(false)).unwrap();
        let msg = assembler.feed_frame(Frame::text("fresh")).unwrap();
        assert_eq!(msg, Some(Message::text("fresh")));
        assert!(!assembler.is_assembling());
        assert_eq!(assembler.buffered_bytes(), 0);
    }

    #[test]
    fn test_orphan_continuation() {
        let mut assembler = MessageAssembler::default();
        let err = assembler.feed_frame(Frame::continuation("x")).unwrap_err();
        assert!(matches!(
            err,
            Error::Message(MessageError::UnexpectedContinuation)
        ));
    }

    #[test]
    fn test_invalid_utf8_across_fragments() {
        let mut assembler = MessageAssembler::default();
        // "é" is 0xC3 0xA9; drop its tail so the final buffer is not UTF-8.
        assembler.feed_frame(Frame::text(vec![b'a', 0xC3]).fin(false)).unwrap();
        let err = assembler.feed_frame(Frame::continuation(vec![b'b'])).unwrap_err();
        assert!(matches!(err, Error::Message(MessageError::InvalidUtf8)));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let mut assembler = MessageAssembler::default();
        assembler.feed_frame(Frame::text(vec![b'a', 0xC3]).fin(false)).unwrap();
        let msg = assembler.feed_frame(Frame::continuation(vec![0xA9])).unwrap();
        assert_eq!(msg, Some(Message::text("aé")));
    }

    #[test]
    fn test_message_size_limit() {
        let mut assembler = MessageAssembler::new(8);
        assembler.feed_frame(Frame::binary(vec![0u8; 5]).fin(false)).unwrap();
        let err = assembler
            .feed_frame(Frame::continuation(vec![0u8; 5]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Message(MessageError::TooLarge { size: 10, max: 8 })
        ));

        let err = assembler.feed_frame(Frame::binary(vec![0u8; 9])).unwrap_err();
        assert_eq!(err.close_code().code(), 1009);
    }
}
