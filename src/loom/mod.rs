//! Loom device link.
//!
//! Everything that talks to the loom hardware (or its in-process stand-in).
//!
//! # Architecture
//!
//! ```text
//!  Session ──write_shafts / set_direction / request_status──► LoomLink
//!                                                               │
//!                                          LoomProtocol::encode_*│
//!                                                               ▼
//!                                    serial port  or  MockLoom (duplex pipe)
//!                                                               │
//!                                   LoomFrameDecoder + decode_reply
//!                                                               ▼
//!  Session ◄──SessionEvent::Loom { generation, LinkEvent }── read loop
//! ```
//!
//! # Modules
//!
//! - [`protocol`] - wire protocols (binary and ASCII)
//! - [`framing`] - byte stream to frame reassembly
//! - [`link`] - connection lifecycle and read loop
//! - [`mock`] - simulated loom

pub mod framing;
pub mod link;
pub mod mock;
pub mod protocol;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bits::BitsError;

pub use link::{LoomLink, LoomTarget};
pub use mock::{MockLoom, MockLoomHandle};
pub use protocol::{AsciiProtocol, BinaryProtocol, LoomProtocol, ProtocolKind};

/// Lifecycle state of the loom link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport open.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open and read loop running.
    Connected,
    /// Tearing the transport down.
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Loom status decoded from a status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoomStatus {
    /// Shed is fully closed.
    pub shed_fully_closed: bool,
    /// Loom is ready for the next pick.
    pub pick_wanted: bool,
    /// Loom reports an error.
    pub error: bool,
}

impl LoomStatus {
    const SHED_FULLY_CLOSED: u32 = 0x01;
    const PICK_WANTED: u32 = 0x04;
    const ERROR: u32 = 0x08;

    /// Decode a status word; unknown bits are ignored.
    pub fn from_state_word(word: u32) -> Self {
        Self {
            shed_fully_closed: word & Self::SHED_FULLY_CLOSED != 0,
            pick_wanted: word & Self::PICK_WANTED != 0,
            error: word & Self::ERROR != 0,
        }
    }

    /// Encode as a status word.
    pub fn to_state_word(self) -> u32 {
        let mut word = 0;
        if self.shed_fully_closed {
            word |= Self::SHED_FULLY_CLOSED;
        }
        if self.pick_wanted {
            word |= Self::PICK_WANTED;
        }
        if self.error {
            word |= Self::ERROR;
        }
        word
    }
}

/// A reply decoded from the loom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoomEvent {
    /// The loom acknowledged a shaft word.
    ShaftsAck(u64),
    /// The loom's direction button was pressed, or a direction command confirmed.
    Direction {
        /// True for forward weaving.
        forward: bool,
    },
    /// Status report.
    Status(LoomStatus),
    /// The loom wants the next pick in the given direction.
    ///
    /// The binary protocol signals this with a single byte and no status word.
    PickRequest {
        /// True for forward weaving.
        forward: bool,
    },
}

/// A command decoded on the loom side of the wire (used by [`MockLoom`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoomCommand {
    /// Raise the shafts in this word.
    Shafts(u64),
    /// Set weave direction.
    Direction {
        /// True for forward weaving.
        forward: bool,
    },
    /// Report status.
    StatusRequest,
}

/// Event from a loom read loop, tagged by the session with its link generation.
#[derive(Debug)]
pub enum LinkEvent {
    /// A decoded reply.
    Reply(LoomEvent),
    /// A frame that could not be decoded. The read loop keeps going.
    Problem(ProtocolError),
    /// The transport failed or closed. The read loop has exited.
    Failed(String),
}

/// Malformed or unrecognized loom traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame with an unknown opcode or value.
    #[error("unrecognized loom frame {}", escape(.0))]
    Unrecognized(Vec<u8>),
    /// A recognized frame with a bad payload.
    #[error("malformed loom frame {}: {reason}", escape(.frame))]
    Malformed {
        /// Raw frame bytes.
        frame: Vec<u8>,
        /// What was wrong.
        reason: String,
    },
    /// More bytes than any frame can hold, without a terminator.
    #[error("loom frame exceeds {0} bytes; discarded")]
    FrameTooLong(usize),
    /// A value could not be encoded for the wire.
    #[error(transparent)]
    Encode(#[from] BitsError),
}

/// Render frame bytes for log and problem messages.
pub(crate) fn escape(bytes: &[u8]) -> String {
    format!("b\"{}\"", bytes.escape_ascii())
}

/// Failures of loom link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link is not connected.
    #[error("loom is not connected")]
    NotConnected,
    /// Opening, reading or writing the transport failed.
    #[error("loom transport failure: {0}")]
    Transport(String),
    /// The command could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Out-of-band commands only reach the simulated loom.
    #[error("out-of-band commands are only supported by the mock loom")]
    OobUnavailable,
    /// The active protocol has no such command.
    #[error("{what} is not supported by the {protocol} loom protocol")]
    Unsupported {
        /// The unsupported operation.
        what: &'static str,
        /// Protocol name.
        protocol: &'static str,
    },
}
