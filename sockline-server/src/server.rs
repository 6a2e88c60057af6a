//! WebSocket server implementation
//!
//! The accept loop: admits streams up to `max_connections`, runs the upgrade
//! handshake for each on its own task and keeps the [`ConnectionManager`]
//! current. On shutdown every live connection is sent a `1001 Going Away`
//! close and given `close_timeout` to finish.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ConfigError, Result, ServerError};
use crate::handler::{BoxedHandler, Handler};
use crate::manager::ConnectionManager;
use crate::tcp_transport::TcpTransport;
use sockline_core::error::CloseCode;
use sockline_core::transport::Transport;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// WebSocket server
pub struct Server {
    config: ServerConfig,
    handlers: Vec<BoxedHandler>,
    manager: ConnectionManager,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handlers", &self.handlers.len())
            .field("manager", &self.manager)
            .finish()
    }
}

impl Server {
    /// Create a new server; every accepted connection is subscribed to `handlers`
    pub fn new(config: ServerConfig, handlers: Vec<BoxedHandler>) -> Self {
        Self {
            config,
            handlers,
            manager: ConnectionManager::new(),
        }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registry of live connections; stays valid after `serve` consumes the server
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Serve on the configured address until Ctrl+C
    pub async fn serve(self) -> Result<()> {
        self.serve_with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                crate::log_error!("failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve on the configured address until `shutdown_signal` resolves
    pub async fn serve_with_graceful_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let transport =
            TcpTransport::bind(self.config.bind_address, self.config.transport_config()).await?;
        self.serve_with_transport(transport, shutdown_signal).await
    }

    /// Serve connections from `transport` until `shutdown_signal` resolves
    pub async fn serve_with_transport<T, F>(self, transport: T, shutdown_signal: F) -> Result<()>
    where
        T: Transport,
        F: Future<Output = ()> + Send,
    {
        let Server {
            config,
            handlers,
            manager,
        } = self;
        let config = Arc::new(config);
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let mut tasks = JoinSet::new();

        if let Ok(addr) = transport.local_addr() {
            crate::log_info!("WebSocket server listening on {}", addr);
        }

        tokio::pin!(shutdown_signal);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    crate::log_info!("shutdown requested");
                    break;
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        crate::log_error!("connection task failed: {}", e);
                    }
                }
                accepted = transport.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            crate::log_error!("accept error: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = permits.clone().try_acquire_owned() else {
                        let err = ServerError::Capacity {
                            current: config.max_connections - permits.available_permits(),
                            max: config.max_connections,
                        };
                        crate::log_warn!("rejecting {}: {}", remote_addr, err);
                        #[cfg(feature = "metrics")]
                        metrics::counter!("sockline_connections_rejected_total").increment(1);
                        drop(stream);
                        continue;
                    };

                    crate::log_debug!("accepted stream from {}", remote_addr);
                    tasks.spawn(handle_connection(
                        stream,
                        remote_addr,
                        config.clone(),
                        handlers.clone(),
                        manager.clone(),
                        permit,
                    ));
                }
            }
        }

        drain(&config, &manager, tasks).await;
        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    remote_addr: SocketAddr,
    config: Arc<ServerConfig>,
    handlers: Vec<BoxedHandler>,
    manager: ConnectionManager,
    _permit: OwnedSemaphorePermit,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let connection = match Connection::accept(stream, Some(remote_addr), &config, handlers).await {
        Ok(connection) => connection,
        Err(e) => {
            crate::log_debug!("upgrade from {} failed: {}", remote_addr, e);
            return;
        }
    };

    let handle = connection.handle();
    let id = handle.id();
    manager.add(handle).await;

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("sockline_connections_opened_total").increment(1);
        metrics::gauge!("sockline_active_connections").set(manager.count().await as f64);
    }

    connection.join().await;
    manager.remove(id).await;
    crate::log_debug!("connection {} from {} finished", id, remote_addr);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("sockline_connections_closed_total").increment(1);
        metrics::gauge!("sockline_active_connections").set(manager.count().await as f64);
    }
}

/// Close every connection with 1001 and wait for the connection tasks to end.
///
/// Streams still in the handshake are given up to the handshake timeout.
/// Anything left after that is killed.
async fn drain(config: &ServerConfig, manager: &ConnectionManager, mut tasks: JoinSet<()>) {
    let live = manager.count().await;
    crate::log_info!("closing {} connection(s)", live);
    manager
        .close_all(CloseCode::Away.code(), "server shutting down")
        .await;

    let grace = config.close_timeout.max(config.handshake_timeout) + Duration::from_millis(100);
    let finished = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        let stragglers = manager.all().await;
        crate::log_warn!(
            "{} connection(s) still open after {:?}, killing",
            stragglers.len(),
            grace
        );
        for handle in stragglers {
            handle.kill();
        }
        tasks.abort_all();
    }
    crate::log_info!("server stopped");
}

/// Server builder
#[derive(Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: Vec<BoxedHandler>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the given address
    pub fn bind<A: std::net::ToSocketAddrs>(mut self, addr: A) -> Result<Self> {
        self.config.bind_address = addr.to_socket_addrs()?.next().ok_or_else(|| {
            ConfigError::InvalidBindAddress("address resolved to nothing".to_string())
        })?;
        Ok(self)
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set how long a close waits for the peer before the stream is dropped
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Echo the request path as the subprotocol when none is offered
    pub fn echo_path_as_protocol(mut self, enabled: bool) -> Self {
        self.config.echo_path_as_protocol = enabled;
        self
    }

    /// Add a header to every handshake response
    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Enable/disable TCP_NODELAY
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Subscribe `handler` to every connection
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;
        Ok(Server::new(self.config, self.handlers))
    }
}
