//! Client channel: the single WebSocket client that drives the loom.
//!
//! - [`messages`] - JSON command and reply types
//! - [`conn`] - per-connection read/write tasks
//! - [`server`] - listener and handshake

pub mod conn;
pub mod messages;
pub mod server;

pub use conn::ClientConn;
pub use messages::{parse_command, ClientCommand, ClientReply, ParsedMessage, Severity};
pub use server::ClientServer;
