//! Outbound messages and the per-connection send queue
//!
//! Every write to a connection's stream goes through one [`OutboundQueue`],
//! drained by a single send loop. Control replies (pong, close) go on the
//! priority lane and overtake data that is queued but not yet written. Each
//! lane is FIFO, so two pings stay in order and so do the messages of any one
//! producer.

use crate::error::ConnectionError;
use bytes::Bytes;
use sockline_core::frame::close_payload;
use sockline_core::protocol::Opcode;
use std::fmt;
use tokio::sync::mpsc;

type SuccessCallback = Box<dyn FnOnce() + Send + 'static>;
type FailureCallback = Box<dyn FnOnce(ConnectionError) + Send + 'static>;

/// A single frame waiting to be written, with optional completion callbacks
pub struct OutboundMessage {
    opcode: Opcode,
    payload: Bytes,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    /// Tear the stream down once this frame is on the wire
    pub(crate) teardown_after_send: bool,
}

impl OutboundMessage {
    fn new(opcode: Opcode, payload: Bytes) -> Self {
        Self {
            opcode,
            payload,
            on_success: None,
            on_failure: None,
            teardown_after_send: false,
        }
    }

    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, Bytes::from(text.into().into_bytes()))
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, data.into())
    }

    /// Create a ping
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, data.into())
    }

    /// Create a pong
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, data.into())
    }

    pub(crate) fn close(code: u16, reason: &str) -> Self {
        Self::new(Opcode::Close, close_payload(Some(code), Some(reason)))
    }

    pub(crate) fn close_echo(payload: Bytes) -> Self {
        Self::new(Opcode::Close, payload)
    }

    pub(crate) fn with_teardown(mut self) -> Self {
        self.teardown_after_send = true;
        self
    }

    /// Run `f` once the frame has been written and flushed
    pub fn on_success(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Run `f` if the frame is never written
    pub fn on_failure(mut self, f: impl FnOnce(ConnectionError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Frame opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Unmasked payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether this is a close frame
    pub fn is_close(&self) -> bool {
        self.opcode == Opcode::Close
    }

    pub(crate) fn succeed(mut self) {
        if let Some(f) = self.on_success.take() {
            f();
        }
    }

    pub(crate) fn fail(mut self, err: ConnectionError) {
        if let Some(f) = self.on_failure.take() {
            f(err);
        }
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("opcode", &self.opcode)
            .field("len", &self.payload.len())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("teardown_after_send", &self.teardown_after_send)
            .finish()
    }
}

/// Create a connected queue / receiver pair
pub fn channel() -> (OutboundQueue, OutboundReceiver) {
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    (
        OutboundQueue {
            normal: normal_tx,
            priority: priority_tx,
        },
        OutboundReceiver {
            normal: normal_rx,
            priority: priority_rx,
        },
    )
}

/// Producer side of the send queue; cheap to clone
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    normal: mpsc::UnboundedSender<OutboundMessage>,
    priority: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundQueue {
    /// Append to the normal lane. Hands the message back if the send loop is gone.
    pub fn enqueue(&self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        self.normal.send(message).map_err(|e| e.0)
    }

    /// Append to the priority lane, ahead of every queued normal message
    pub fn enqueue_priority(&self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        self.priority.send(message).map_err(|e| e.0)
    }
}

/// Consumer side of the send queue, owned by the send loop
#[derive(Debug)]
pub struct OutboundReceiver {
    normal: mpsc::UnboundedReceiver<OutboundMessage>,
    priority: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl OutboundReceiver {
    /// Wait for the next message, priority lane first.
    ///
    /// Returns `None` once both lanes are closed and empty.
    pub async fn dequeue(&mut self) -> Option<OutboundMessage> {
        tokio::select! {
            biased;
            Some(message) = self.priority.recv() => Some(message),
            Some(message) = self.normal.recv() => Some(message),
            else => None,
        }
    }

    /// Take the next message without waiting
    pub fn try_dequeue(&mut self) -> Option<OutboundMessage> {
        self.priority
            .try_recv()
            .ok()
            .or_else(|| self.normal.try_recv().ok())
    }

    /// Refuse further enqueues; already queued messages can still be taken
    pub fn close(&mut self) {
        self.priority.close();
        self.normal.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn payload(message: &OutboundMessage) -> &[u8] {
        message.payload()
    }

    #[tokio::test]
    async fn test_priority_overtakes_normal() {
        let (queue, mut rx) = channel();
        queue.enqueue(OutboundMessage::text("a")).unwrap();
        queue.enqueue(OutboundMessage::text("b")).unwrap();
        queue.enqueue_priority(OutboundMessage::pong("p1")).unwrap();
        queue.enqueue_priority(OutboundMessage::pong("p2")).unwrap();

        let order: Vec<Vec<u8>> = [
            rx.dequeue().await,
            rx.dequeue().await,
            rx.dequeue().await,
            rx.dequeue().await,
        ]
        .iter()
        .map(|m| payload(m.as_ref().unwrap()).to_vec())
        .collect();

        assert_eq!(
            order,
            vec![b"p1".to_vec(), b"p2".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_message() {
        let (queue, mut rx) = channel();
        let waiter = tokio::spawn(async move { rx.dequeue().await.map(|m| m.opcode()) });
        tokio::task::yield_now().await;
        queue.enqueue(OutboundMessage::binary(vec![1u8])).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(Opcode::Binary));
    }

    #[tokio::test]
    async fn test_concurrent_sources_keep_their_order() {
        let (queue, mut rx) = channel();

        let producers: Vec<_> = (0..3u8)
            .map(|source| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for seq in 0..50u8 {
                        queue.enqueue(OutboundMessage::binary(vec![source, seq])).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let mut last = [None::<u8>; 3];
        for _ in 0..150 {
            let message = rx.try_dequeue().unwrap();
            let (source, seq) = (message.payload()[0] as usize, message.payload()[1]);
            assert!(last[source].map_or(true, |prev| prev < seq));
            last[source] = Some(seq);
        }
        assert!(rx.try_dequeue().is_none());
    }

    #[test]
    fn test_enqueue_after_close_returns_message() {
        let (queue, mut rx) = channel();
        queue.enqueue(OutboundMessage::text("queued")).unwrap();
        rx.close();

        let rejected = queue.enqueue(OutboundMessage::text("late")).unwrap_err();
        assert_eq!(rejected.payload(), &Bytes::from_static(b"late"));
        assert_eq!(rx.try_dequeue().map(|m| m.payload().clone()), Some(Bytes::from_static(b"queued")));
    }

    #[test]
    fn test_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let failure = Arc::new(Mutex::new(None));

        let counter = hits.clone();
        OutboundMessage::text("ok")
            .on_success(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .succeed();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let slot = failure.clone();
        OutboundMessage::text("lost")
            .on_failure(move |err| {
                *slot.lock().unwrap() = Some(err);
            })
            .fail(ConnectionError::Closed);
        assert_eq!(*failure.lock().unwrap(), Some(ConnectionError::Closed));
    }

    #[test]
    fn test_close_payload_layout() {
        let message = OutboundMessage::close(1000, "bye");
        assert!(message.is_close());
        assert_eq!(&message.payload()[..], &[0x03, 0xe8, b'b', b'y', b'e']);
        assert!(!message.teardown_after_send);
        assert!(message.with_teardown().teardown_after_send);
    }
}
