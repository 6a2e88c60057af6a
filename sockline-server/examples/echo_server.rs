//! Echo server example
//!
//! Echoes every message back and logs lifecycle events. Try it with any
//! WebSocket client, e.g. `websocat ws://127.0.0.1:8080/chat`.
//!
//! Run with `cargo run --example echo_server --features logging`.

use sockline_server::{ConnectionHandle, ConnectionState, EchoHandler, Handler, Server};
use std::time::Duration;

/// Logs state transitions next to the echo
struct LifecycleLogger;

impl Handler for LifecycleLogger {
    fn on_state_change(&self, connection: &ConnectionHandle, state: ConnectionState) {
        println!(
            "connection {} ({}) is now {}",
            connection.id(),
            connection.path(),
            state
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sockline_server::logging::init_logging()?;

    let server = Server::builder()
        .bind("127.0.0.1:8080")?
        .max_connections(1000)
        .handshake_timeout(Duration::from_secs(10))
        .close_timeout(Duration::from_secs(3))
        .handler(EchoHandler::new())
        .handler(LifecycleLogger)
        .build()?;

    println!("WebSocket server listening on ws://127.0.0.1:8080");
    println!("Press Ctrl+C to stop");

    server.serve().await?;

    Ok(())
}
