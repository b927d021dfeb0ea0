//! Per-connection state for the WebSocket client (session-side).
//!
//! Each accepted connection gets a [`ClientConn`] that owns a read task and
//! a write task and translates between WebSocket messages and
//! [`SessionEvent`]s.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::messages::ClientReply;
use crate::constants::CLIENT_CLOSE_TIMEOUT;
use crate::session::events::{IncomingMessage, SessionEvent};

/// Queued outgoing message.
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(String),
}

/// Session-side connection state for one WebSocket client.
pub struct ClientConn {
    /// Identifier assigned by the accept loop.
    client_id: String,
    /// Sender for outgoing messages.
    out_tx: UnboundedSender<Outgoing>,
    /// Handle to the read task.
    read_handle: JoinHandle<()>,
    /// Handle to the write task.
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientConn {
    /// Create a connection handler for an accepted WebSocket.
    ///
    /// Spawns read and write tasks:
    /// - Read task: WebSocket messages → `SessionEvent::ClientMessage`
    /// - Write task: queued replies → WebSocket text frames
    pub(crate) fn new<S>(
        client_id: String,
        ws: WebSocketStream<S>,
        event_tx: UnboundedSender<SessionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let read_handle = tokio::spawn(Self::read_loop(client_id.clone(), stream, event_tx));
        let write_handle = tokio::spawn(Self::write_loop(client_id.clone(), sink, out_rx));

        Self {
            client_id,
            out_tx,
            read_handle,
            write_handle,
        }
    }

    /// Client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue a reply. Returns `false` if the reply could not be serialized
    /// or the write task has stopped.
    pub fn send(&self, reply: &ClientReply) -> bool {
        match reply.to_json() {
            Ok(text) => self.out_tx.send(Outgoing::Text(text)).is_ok(),
            Err(e) => {
                log::error!("[Client] Could not serialize reply for {}: {e}", self.client_id);
                false
            }
        }
    }

    /// Close with a reason, waiting at most [`CLIENT_CLOSE_TIMEOUT`].
    ///
    /// Queued replies are flushed first. Best effort: failures are logged.
    pub async fn close(self, reason: &str) {
        self.read_handle.abort();
        if self.out_tx.send(Outgoing::Close(reason.to_string())).is_err() {
            log::debug!("[Client] {} already closed", self.client_id);
            return;
        }
        let abort = self.write_handle.abort_handle();
        if tokio::time::timeout(CLIENT_CLOSE_TIMEOUT, self.write_handle).await.is_err() {
            log::warn!("[Client] Timed out closing {}", self.client_id);
            abort.abort();
        }
    }

    /// Drop the connection without a close handshake.
    pub fn disconnect(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }

    /// Read loop - forwards client messages to the session.
    async fn read_loop<S>(
        client_id: String,
        mut stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
        event_tx: UnboundedSender<SessionEvent>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(result) = stream.next().await {
            let message = match result {
                Ok(Message::Text(text)) => IncomingMessage::Text(text),
                Ok(Message::Binary(data)) => IncomingMessage::Binary(data),
                Ok(Message::Close(_)) => break,
                // Pings are answered by tungstenite; other control frames carry nothing
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    log::warn!("[Client] Read error for {}: {e}", client_id);
                    break;
                }
            };
            let event = SessionEvent::ClientMessage {
                client_id: client_id.clone(),
                message,
            };
            if event_tx.send(event).is_err() {
                return;
            }
        }

        log::info!("[Client] Client disconnected: {}", client_id);
        let _ = event_tx.send(SessionEvent::ClientDisconnected { client_id });
    }

    /// Write loop - sends queued replies until closed.
    async fn write_loop<S>(
        client_id: String,
        mut sink: futures_util::stream::SplitSink<WebSocketStream<S>, Message>,
        mut out_rx: UnboundedReceiver<Outgoing>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(outgoing) = out_rx.recv().await {
            let (message, closing) = match outgoing {
                Outgoing::Text(text) => (Message::Text(text), false),
                Outgoing::Close(reason) => (
                    Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if let Err(e) = sink.send(message).await {
                log::warn!("[Client] Write error for {}: {e}", client_id);
                return;
            }
            if closing {
                break;
            }
        }
        if let Err(e) = sink.close().await {
            log::debug!("[Client] Close error for {}: {e}", client_id);
        }
    }
}
