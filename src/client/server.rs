//! WebSocket listener for client connections.
//!
//! Accepts TCP connections, performs the WebSocket handshake, and announces
//! each client to the session via `SessionEvent::ClientConnected`. The
//! session decides what to do with an extra client (it supersedes the old).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::conn::ClientConn;
use crate::constants::ACCEPT_RETRY_DELAY;
use crate::session::events::SessionEvent;

/// WebSocket server for loom clients.
#[derive(Debug)]
pub struct ClientServer {
    /// Bound address (useful when binding port 0).
    local_addr: SocketAddr,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl ClientServer {
    /// Bind `addr` and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(addr: &str, event_tx: UnboundedSender<SessionEvent>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind client listener on {addr}"))?;
        let local_addr = listener.local_addr().context("Failed to read listener address")?;

        log::info!("[Client] Listening on ws://{local_addr}");
        let accept_handle = tokio::spawn(Self::accept_loop(listener, event_tx));

        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop - runs as a tokio task.
    async fn accept_loop(listener: TcpListener, event_tx: UnboundedSender<SessionEvent>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if event_tx.is_closed() {
                        log::warn!("[Client] Session channel closed, stopping accept loop");
                        break;
                    }
                    tokio::spawn(Self::handshake(stream, addr, event_tx.clone()));
                }
                Err(e) => {
                    log::error!("[Client] Accept error: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Complete the WebSocket handshake and hand the client to the session.
    async fn handshake(stream: TcpStream, addr: SocketAddr, event_tx: UnboundedSender<SessionEvent>) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("[Client] Handshake with {addr} failed: {e}");
                return;
            }
        };

        let client_id = generate_client_id();
        log::info!("[Client] Client connected: {} from {}", client_id, addr);
        let conn = ClientConn::new(client_id.clone(), ws, event_tx.clone());
        if let Err(e) = event_tx.send(SessionEvent::ClientConnected { client_id, conn }) {
            log::warn!("[Client] Session gone; dropping client");
            if let SessionEvent::ClientConnected { conn, .. } = e.0 {
                conn.disconnect();
            }
        }
    }

    /// Stop accepting clients.
    pub fn shutdown(self) {
        self.accept_handle.abort();
    }
}

/// Generate a unique client ID from a monotonic counter.
fn generate_client_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("client:{seq:x}")
}
