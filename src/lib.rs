//! Loom server - drives a computer-controlled dobby loom.
//!
//! Holds the weaving pattern, tracks which pick the weaver is on, and sends
//! the shaft pattern for each pick to the loom over a serial link when the
//! loom asks for it. A single browser client connects over WebSocket to
//! upload patterns, pick one, jump within it and change weave direction.
//!
//! # Architecture
//!
//! The crate follows a single-owner event loop pattern:
//!
//! - **Session** - Orchestrator, owns all session state, runs the event loop
//! - **Loom** - Serial (or simulated) device link with pluggable wire protocols
//! - **Client** - WebSocket listener and per-client connection tasks
//! - **Store** - JSON pattern store with weaving progress
//!
//! # Modules
//!
//! - [`bits`] - shaft word bit codec
//! - [`pattern`] - reduced pattern model and WIF reader
//! - [`sequencer`] - pick stepping and jump overrides
//! - [`loom`] - loom link, protocols and mock loom
//! - [`client`] - client WebSocket transport and message types
//! - [`session`] - session orchestrator
//! - [`store`] - pattern persistence
//! - [`config`] - configuration
//! - [`server`] - server assembly

pub mod bits;
pub mod client;
pub mod config;
pub mod constants;
pub mod loom;
pub mod pattern;
pub mod sequencer;
pub mod server;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{Config, DirectionControl};
pub use loom::{ConnectionState, LoomStatus, ProtocolKind};
pub use pattern::{Pattern, Pick};
pub use server::LoomServer;
pub use session::Session;
