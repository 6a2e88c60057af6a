//! WebSocket connection handling
//!
//! A [`Connection`] owns one upgraded stream and drives it with two tasks:
//!
//! - the read loop decodes frames, reassembles messages and answers control
//!   frames by queueing replies;
//! - the send loop is the only writer of the stream. It drains the
//!   [`OutboundQueue`](crate::outbound::OutboundQueue), priority lane first.
//!
//! Consumers interact through a cloneable [`ConnectionHandle`].

use crate::config::ServerConfig;
use crate::error::{ConnectionError, Result, ServerError};
use crate::handler::{BoxedHandler, Handler};
use crate::outbound::{self, OutboundMessage, OutboundQueue, OutboundReceiver};
use crate::state::StateCell;
use bytes::Bytes;
use sockline_core::error::{CloseCode, Error, FrameError};
use sockline_core::frame::{Frame, FrameConfig};
use sockline_core::handshake::{self, Handshake};
use sockline_core::message::{Message, MessageAssembler};
use sockline_core::protocol::{constants, Opcode};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use crate::state::ConnectionState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Request path from the upgrade request
    pub path: String,
    /// Negotiated subprotocol
    pub subprotocol: Option<String>,
    /// Peer address, when the transport knows it
    pub remote_addr: Option<SocketAddr>,
    /// Maximum inbound frame size
    pub max_frame_size: usize,
    /// Maximum reassembled message size
    pub max_message_size: usize,
    /// How long a locally initiated close waits for the peer's reply
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            subprotocol: None,
            remote_addr: None,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE,
            close_timeout: constants::DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ConnectionOptions {
    /// Limits and timeouts taken from the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            max_message_size: config.max_message_size,
            close_timeout: config.close_timeout,
            ..Default::default()
        }
    }

    /// Record the path and subprotocol agreed during the handshake
    pub fn with_handshake(mut self, handshake: &Handshake) -> Self {
        self.path = handshake.request.path.clone();
        self.subprotocol = handshake.protocol.clone();
        self
    }

    /// Set the peer address
    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }
}

/// Connection metadata snapshot
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Connection ID
    pub id: u64,
    /// Peer address
    pub remote_addr: Option<SocketAddr>,
    /// Request path
    pub path: String,
    /// WebSocket subprotocol
    pub subprotocol: Option<String>,
    /// Connection established time
    pub established_at: Instant,
    /// Messages sent count
    pub messages_sent: u64,
    /// Messages received count
    pub messages_received: u64,
    /// Bytes sent count (encoded frames)
    pub bytes_sent: u64,
    /// Bytes received count (message payloads)
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

struct Shared {
    id: u64,
    state: StateCell,
    queue: OutboundQueue,
    handlers: RwLock<Vec<BoxedHandler>>,
    shutdown: watch::Sender<bool>,
    close_sent: AtomicBool,
    close_received: AtomicBool,
    counters: Counters,
    established_at: Instant,
    options: ConnectionOptions,
}

/// Handle to a running connection; cheap to clone
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("path", &self.shared.options.path)
            .finish()
    }
}

impl ConnectionHandle {
    /// Get the connection ID
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Get the connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Check if the connection is open
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Negotiated subprotocol
    pub fn subprotocol(&self) -> Option<&str> {
        self.shared.options.subprotocol.as_deref()
    }

    /// Request path from the upgrade request
    pub fn path(&self) -> &str {
        &self.shared.options.path
    }

    /// Peer address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.options.remote_addr
    }

    /// Get the connection metadata
    pub fn metadata(&self) -> ConnectionMetadata {
        let counters = &self.shared.counters;
        ConnectionMetadata {
            id: self.shared.id,
            remote_addr: self.shared.options.remote_addr,
            path: self.shared.options.path.clone(),
            subprotocol: self.shared.options.subprotocol.clone(),
            established_at: self.shared.established_at,
            messages_sent: counters.messages_sent.load(Ordering::Relaxed),
            messages_received: counters.messages_received.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Attach another handler; it sees every notification from now on
    pub fn subscribe(&self, handler: BoxedHandler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Queue a message for sending.
    ///
    /// Fails with [`ConnectionError::Closed`] unless the connection is open;
    /// the message's callbacks do not run in that case. Once queued, exactly
    /// one of its callbacks runs.
    pub fn send(&self, message: OutboundMessage) -> std::result::Result<(), ConnectionError> {
        if message.opcode().is_control() && message.payload().len() > constants::MAX_CONTROL_PAYLOAD
        {
            return Err(ConnectionError::InvalidMessage(format!(
                "control payload of {} bytes exceeds {}",
                message.payload().len(),
                constants::MAX_CONTROL_PAYLOAD
            )));
        }
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.shared
            .queue
            .enqueue(message)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Send a text message
    pub fn send_text(&self, text: impl Into<String>) -> std::result::Result<(), ConnectionError> {
        self.send(OutboundMessage::text(text))
    }

    /// Send a binary message
    pub fn send_binary(&self, data: impl Into<Bytes>) -> std::result::Result<(), ConnectionError> {
        self.send(OutboundMessage::binary(data))
    }

    /// Send a ping
    pub fn ping(&self, data: impl Into<Bytes>) -> std::result::Result<(), ConnectionError> {
        self.send(OutboundMessage::ping(data))
    }

    /// Start the close handshake.
    ///
    /// The close frame overtakes any queued data; data still queued behind
    /// it is failed with [`ConnectionError::Closed`]. If the peer has not
    /// answered within the close timeout the connection is killed.
    pub fn close(&self, code: u16, reason: &str) -> std::result::Result<(), ConnectionError> {
        if !self.shared.state.begin_closing() {
            return Err(ConnectionError::Closed);
        }
        crate::log_debug!("connection {} closing locally with {}", self.id(), code);
        self.notify_state(ConnectionState::Closing);

        let message = OutboundMessage::close(code, truncate_reason(reason));
        if let Err(message) = self.shared.queue.enqueue_priority(message) {
            message.fail(ConnectionError::Closed);
            self.kill();
            return Err(ConnectionError::Closed);
        }

        let handle = self.clone();
        let timeout = self.shared.options.close_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.closed() => {}
                _ = tokio::time::sleep(timeout) => {
                    crate::log_warn!(
                        "connection {} did not answer close within {:?}",
                        handle.id(),
                        timeout
                    );
                    handle.kill();
                }
            }
        });
        Ok(())
    }

    /// Tear the connection down immediately without a close handshake
    pub fn kill(&self) {
        if let Some(prev) = self.shared.state.mark_closed() {
            crate::log_info!("connection {} closed (was {})", self.id(), prev);
            self.notify_state(ConnectionState::Closed);
            self.shared.shutdown.send_replace(true);
        }
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`]
    pub async fn closed(&self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            if *shutdown.borrow_and_update() {
                return;
            }
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    fn handlers(&self) -> Vec<BoxedHandler> {
        self.shared
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn notify(&self, f: impl Fn(&dyn Handler)) {
        for handler in self.handlers() {
            f(handler.as_ref());
        }
    }

    fn notify_state(&self, state: ConnectionState) {
        self.notify(|h| h.on_state_change(self, state));
    }

    /// Fail the connection: send a close carrying `err`'s status, then tear down.
    fn fail(&self, err: &Error) {
        let code = err.close_code();
        crate::log_warn!("connection {} protocol error: {}", self.id(), err);

        if code.is_reserved() || !self.shared.state.begin_closing() {
            self.kill();
            return;
        }
        self.notify_state(ConnectionState::Closing);

        let reason = err.to_string();
        let message = OutboundMessage::close(code.code(), truncate_reason(&reason)).with_teardown();
        if let Err(message) = self.shared.queue.enqueue_priority(message) {
            message.fail(ConnectionError::Closed);
            self.kill();
        }
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= constants::MAX_CLOSE_REASON_SIZE {
        return reason;
    }
    let mut end = constants::MAX_CLOSE_REASON_SIZE;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// A running WebSocket connection
pub struct Connection {
    handle: ConnectionHandle,
    read_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Connection {
    /// Run the upgrade handshake on `stream` and start the connection.
    ///
    /// A rejected request is answered with `400 Bad Request` and no
    /// connection is created.
    pub async fn accept<S>(
        stream: S,
        remote_addr: Option<SocketAddr>,
        config: &ServerConfig,
        handlers: Vec<BoxedHandler>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut stream = BufReader::new(stream);
        let handshake_config = config.handshake_config();

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let negotiated = tokio::time::timeout(
            config.handshake_timeout,
            handshake::negotiate(&mut stream, &handshake_config),
        )
        .await;

        let handshake = match negotiated {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(err)) => {
                crate::log_debug!("handshake from {:?} rejected: {}", remote_addr, err);
                if !err.is_transport() {
                    let response = handshake::response_to_string(&handshake::bad_request_response());
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
                return Err(err.into());
            }
            Err(_) => {
                crate::log_debug!("handshake from {:?} timed out", remote_addr);
                return Err(ServerError::HandshakeTimeout {
                    duration: config.handshake_timeout,
                });
            }
        };

        #[cfg(feature = "metrics")]
        metrics::histogram!("sockline_handshake_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        let options = ConnectionOptions::from_config(config)
            .with_handshake(&handshake)
            .with_remote_addr(remote_addr);
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self::from_parts(reader, writer, options, handlers))
    }

    /// Start a connection over an already upgraded stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_parts<R, W>(
        reader: R,
        writer: W,
        options: ConnectionOptions,
        handlers: Vec<BoxedHandler>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (queue, outbound) = outbound::channel();
        let (shutdown, _) = watch::channel(false);
        let frame_config = FrameConfig::server(options.max_frame_size);
        let assembler = MessageAssembler::new(options.max_message_size);

        let handle = ConnectionHandle {
            shared: Arc::new(Shared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                state: StateCell::new(),
                queue,
                handlers: RwLock::new(handlers),
                shutdown,
                close_sent: AtomicBool::new(false),
                close_received: AtomicBool::new(false),
                counters: Counters::default(),
                established_at: Instant::now(),
                options,
            }),
        };

        crate::log_info!(
            "connection {} open on {} (protocol {:?})",
            handle.id(),
            handle.path(),
            handle.subprotocol()
        );
        handle.notify_state(ConnectionState::Open);

        let read_shutdown = handle.shared.shutdown.subscribe();
        let send_shutdown = handle.shared.shutdown.subscribe();
        let read_task = tokio::spawn(read_loop(
            handle.clone(),
            reader,
            frame_config,
            assembler,
            read_shutdown,
        ));
        let send_task = tokio::spawn(send_loop(handle.clone(), writer, outbound, send_shutdown));

        Self {
            handle,
            read_task,
            send_task,
        }
    }

    /// Get a handle to this connection
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Wait for both connection loops to finish
    pub async fn join(self) {
        let _ = self.read_task.await;
        let _ = self.send_task.await;
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn read_loop<R>(
    handle: ConnectionHandle,
    mut reader: R,
    config: FrameConfig,
    mut assembler: MessageAssembler,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        if *shutdown.borrow() || handle.state() == ConnectionState::Closed {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = Frame::read_from(&mut reader, &config) => result,
        };

        let flow = match result {
            Ok(frame) => on_frame(&handle, frame, &mut assembler),
            Err(err) => on_read_error(&handle, err),
        };
        if let Flow::Stop = flow {
            break;
        }
    }
    crate::log_trace!("connection {} read loop finished", handle.id());
}

fn on_read_error(handle: &ConnectionHandle, err: Error) -> Flow {
    match err {
        Error::Io(ref e) => {
            crate::log_debug!("connection {} read failed: {}", handle.id(), e);
            handle.kill();
            Flow::Stop
        }
        Error::Frame(FrameError::Unmasked) => {
            crate::log_warn!("connection {} sent an unmasked frame", handle.id());
            handle.kill();
            Flow::Stop
        }
        // The oversized payload is still on the wire, so framing is lost.
        Error::Frame(FrameError::TooLarge { .. }) => {
            handle.fail(&err);
            Flow::Stop
        }
        _ => {
            handle.fail(&err);
            Flow::Continue
        }
    }
}

fn on_frame(handle: &ConnectionHandle, frame: Frame, assembler: &mut MessageAssembler) -> Flow {
    crate::log_trace!(
        "connection {} received {:?} frame ({} bytes, fin={})",
        handle.id(),
        frame.opcode,
        frame.payload.len(),
        frame.fin
    );

    match frame.opcode {
        Opcode::Text | Opcode::Binary | Opcode::Continuation => {
            if !handle.is_open() {
                return Flow::Continue;
            }
            match assembler.feed_frame(frame) {
                Ok(Some(message)) => deliver(handle, message),
                Ok(None) => {}
                Err(err) => handle.fail(&err),
            }
            Flow::Continue
        }
        Opcode::Close => on_close_frame(handle, frame.payload),
        Opcode::Ping => {
            if handle.is_open() {
                let pong = OutboundMessage::pong(frame.payload);
                if let Err(pong) = handle.shared.queue.enqueue_priority(pong) {
                    pong.fail(ConnectionError::Closed);
                }
            }
            Flow::Continue
        }
        Opcode::Pong => Flow::Continue,
        opcode => {
            crate::log_warn!(
                "connection {} sent unsupported opcode {:#x}",
                handle.id(),
                opcode.value()
            );
            let _ = handle.close(CloseCode::ProtocolError.code(), "unsupported opcode");
            Flow::Continue
        }
    }
}

fn on_close_frame(handle: &ConnectionHandle, payload: Bytes) -> Flow {
    let shared = &handle.shared;
    shared.close_received.store(true, Ordering::SeqCst);

    if shared.state.begin_closing() {
        match sockline_core::frame::parse_close_payload(&payload) {
            Some((code, reason)) => {
                crate::log_info!(
                    "connection {} closed by peer: {} {}",
                    handle.id(),
                    CloseCode::from(code),
                    reason
                );
            }
            None => {
                crate::log_info!("connection {} closed by peer", handle.id());
            }
        }
        handle.notify_state(ConnectionState::Closing);

        let ack = OutboundMessage::close_echo(payload).with_teardown();
        if let Err(ack) = shared.queue.enqueue_priority(ack) {
            ack.fail(ConnectionError::Closed);
            handle.kill();
        }
    } else if shared.close_sent.load(Ordering::SeqCst) {
        // Reply to our own close: the handshake is complete.
        handle.kill();
    }
    Flow::Stop
}

fn deliver(handle: &ConnectionHandle, message: Message) {
    let counters = &handle.shared.counters;
    counters.messages_received.fetch_add(1, Ordering::Relaxed);
    counters
        .bytes_received
        .fetch_add(message.len() as u64, Ordering::Relaxed);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("sockline_messages_received_total").increment(1);
        metrics::counter!("sockline_bytes_received_total").increment(message.len() as u64);
    }

    match message {
        Message::Text(text) => handle.notify(|h| h.on_text(handle, &text)),
        Message::Binary(data) => handle.notify(|h| h.on_binary(handle, &data)),
    }
}

async fn send_loop<W>(
    handle: ConnectionHandle,
    mut writer: W,
    mut outbound: OutboundReceiver,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Send + Unpin,
{
    let mut stalled = false;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = outbound.dequeue() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let writable = match handle.state() {
            ConnectionState::Open => true,
            ConnectionState::Closing => message.is_close(),
            ConnectionState::Closed => false,
        };
        if !writable {
            crate::log_trace!(
                "connection {} dropping {:?} after close",
                handle.id(),
                message.opcode()
            );
            message.fail(ConnectionError::Closed);
            continue;
        }

        let bytes = Frame::new(message.opcode(), message.payload().clone()).to_bytes();
        // A peer that stops reading must not keep a killed connection alive.
        let written = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            result = write_frame(&mut writer, &bytes) => Some(result),
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                crate::log_debug!("connection {} write failed: {}", handle.id(), e);
                message.fail(ConnectionError::Transport(e.to_string()));
                handle.kill();
                break;
            }
            None => {
                crate::log_debug!(
                    "connection {} killed with a {:?} frame in flight",
                    handle.id(),
                    message.opcode()
                );
                message.fail(ConnectionError::Closed);
                stalled = true;
                break;
            }
        }

        let counters = &handle.shared.counters;
        counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("sockline_messages_sent_total").increment(1);
            metrics::counter!("sockline_bytes_sent_total").increment(bytes.len() as u64);
        }

        let is_close = message.is_close();
        let teardown = message.teardown_after_send;
        handle.notify(|h| h.on_sent(&handle, &message));
        message.succeed();

        if is_close {
            handle.shared.close_sent.store(true, Ordering::SeqCst);
            if teardown || handle.shared.close_received.load(Ordering::SeqCst) {
                handle.kill();
                break;
            }
        }
    }

    outbound.close();
    while let Some(message) = outbound.try_dequeue() {
        message.fail(ConnectionError::Closed);
    }
    // The peer is not draining the stream; dropping the writer releases it.
    if !stalled {
        let _ = writer.shutdown().await;
    }
    crate::log_trace!("connection {} send loop finished", handle.id());
}

async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ChannelHandler;
    use tokio::io::{duplex, AsyncReadExt};

    const KEY: [u8; 4] = [1, 2, 3, 4];

    fn client_frame(frame: Frame) -> Bytes {
        frame.with_mask(KEY).to_bytes()
    }

    async fn read_server_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Frame {
        Frame::read_from(reader, &FrameConfig::client(1 << 20))
            .await
            .unwrap()
    }

    #[test]
    fn test_truncate_reason() {
        assert_eq!(truncate_reason("short"), "short");
        let long = "é".repeat(100);
        let cut = truncate_reason(&long);
        assert!(cut.len() <= constants::MAX_CLOSE_REASON_SIZE);
        assert_eq!(cut.len() % 2, 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, _a_peer) = duplex(64);
        let (b, _b_peer) = duplex(64);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let first = Connection::from_parts(ar, aw, ConnectionOptions::default(), vec![]);
        let second = Connection::from_parts(br, bw, ConnectionOptions::default(), vec![]);
        assert_ne!(first.handle().id(), second.handle().id());
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let (server, client) = duplex(1024);
        let (sr, sw) = tokio::io::split(server);
        let (mut cr, mut cw) = tokio::io::split(client);
        let _conn = Connection::from_parts(sr, sw, ConnectionOptions::default(), vec![]);

        cw.write_all(&client_frame(Frame::ping("hb"))).await.unwrap();
        let pong = read_server_frame(&mut cr).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, "hb");
        assert_eq!(pong.mask, None);
    }

    #[tokio::test]
    async fn test_send_after_kill_fails() {
        let (server, _client) = duplex(1024);
        let (sr, sw) = tokio::io::split(server);
        let conn = Connection::from_parts(sr, sw, ConnectionOptions::default(), vec![]);
        let handle = conn.handle();

        handle.kill();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(handle.send_text("late"), Err(ConnectionError::Closed));
        assert_eq!(handle.close(1000, ""), Err(ConnectionError::Closed));
        handle.closed().await;
        conn.join().await;
    }

    #[tokio::test]
    async fn test_oversized_ping_rejected() {
        let (server, _client) = duplex(1024);
        let (sr, sw) = tokio::io::split(server);
        let conn = Connection::from_parts(sr, sw, ConnectionOptions::default(), vec![]);
        let err = conn.handle().ping(vec![0u8; 200]).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_state_notifications() {
        let (server, client) = duplex(1024);
        let (sr, sw) = tokio::io::split(server);
        let (handler, mut events) = ChannelHandler::new();
        let conn = Connection::from_parts(
            sr,
            sw,
            ConnectionOptions::default(),
            vec![Arc::new(handler) as BoxedHandler],
        );
        let handle = conn.handle();

        handle.kill();
        drop(client);
        conn.join().await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let crate::handler::ConnectionEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![ConnectionState::Open, ConnectionState::Closed]);
    }

    #[tokio::test]
    async fn test_metadata_counts_traffic() {
        let (server, client) = duplex(1024);
        let (sr, sw) = tokio::io::split(server);
        let (mut cr, mut cw) = tokio::io::split(client);
        let options = ConnectionOptions {
            path: "/feed".to_string(),
            subprotocol: Some("feed".to_string()),
            ..Default::default()
        };
        let conn = Connection::from_parts(sr, sw, options, vec![]);
        let handle = conn.handle();

        cw.write_all(&client_frame(Frame::text("abc"))).await.unwrap();
        handle.send_text("hello").unwrap();
        let frame = read_server_frame(&mut cr).await;
        assert_eq!(frame.payload, "hello");

        // Give the read loop a moment to account for the inbound message.
        let mut buf = [0u8; 1];
        let _ = tokio::time::timeout(Duration::from_millis(50), cr.read(&mut buf)).await;

        let meta = handle.metadata();
        assert_eq!(meta.path, "/feed");
        assert_eq!(handle.subprotocol(), Some("feed"));
        assert_eq!(meta.messages_sent, 1);
        assert_eq!(meta.bytes_sent, 7);
        assert_eq!(meta.messages_received, 1);
        assert_eq!(meta.bytes_received, 3);
    }
}
