//! Unified event channel for the session loop.
//!
//! The client accept loop, per-client read loops and the loom read loop all
//! send events through a single `mpsc::UnboundedSender<SessionEvent>`. The
//! session loop is the only receiver and the only owner of session state.
//!
//! Rust guideline compliant 2026-02

use crate::client::ClientConn;
use crate::loom::{ConnectionState, LinkEvent};

/// Raw message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Event delivered to the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A client completed the WebSocket handshake.
    ClientConnected {
        /// Identifier assigned by the accept loop.
        client_id: String,
        /// Connection handle.
        conn: ClientConn,
    },

    /// A client sent a message.
    ClientMessage {
        /// Sending client.
        client_id: String,
        /// Message payload.
        message: IncomingMessage,
    },

    /// A client's read loop ended.
    ClientDisconnected {
        /// Disconnected client.
        client_id: String,
    },

    /// The loom link changed state.
    ///
    /// Sent by [`LoomLink`](crate::loom::LoomLink) itself, in transition order.
    LoomState {
        /// New state.
        state: ConnectionState,
        /// Why, for failures.
        reason: Option<String>,
    },

    /// Event from a loom read loop.
    Loom {
        /// Link generation of the read loop that produced it.
        generation: u64,
        /// The event.
        event: LinkEvent,
    },

    /// Stop the session loop.
    Shutdown,
}
