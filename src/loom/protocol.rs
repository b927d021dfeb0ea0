//! Loom wire protocols.
//!
//! Two protocol generations are supported, chosen at startup:
//!
//! ```text
//! binary   host → loom   [shaft word: num_shafts/8 bytes, bit-reversed]
//!          loom → host   0x01 = pick wanted, weaving forward
//!                        0x02 = pick wanted, weaving backward
//!
//! ascii    host → loom   =C<hex shaft word>\r   raise shafts
//!                        =U<0|1>\r              weave direction (0 = forward)
//!                        =S\r                   request status
//!          loom → host   =c<hex shaft word>\r   shafts acknowledged
//!                        =u<0|1>\r              direction button
//!                        =s<hex status word>\r  status (bit 2 = pick wanted)
//! ```
//!
//! Both sides of each protocol live here so the [`MockLoom`](super::MockLoom)
//! speaks exactly what the link expects.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{LoomCommand, LoomEvent, LoomStatus, ProtocolError};
use crate::bits::{shaft_word_to_wire, wire_to_shaft_word};
use crate::constants::{ASCII_FRAME_START, TERMINATOR};

/// How a byte stream splits into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBoundary {
    /// Every frame is exactly this many bytes.
    Fixed(usize),
    /// Frames end with this byte, which is not part of the frame.
    Terminated(u8),
}

/// A loom wire protocol.
///
/// Host-side methods encode commands and decode replies; loom-side methods
/// do the reverse for the simulated loom.
pub trait LoomProtocol: Debug + Send + Sync {
    /// Short protocol name for logs and messages.
    fn name(&self) -> &'static str;

    /// Framing of loom → host replies.
    fn reply_boundary(&self) -> FrameBoundary;

    /// Framing of host → loom commands.
    fn command_boundary(&self) -> FrameBoundary;

    /// Encode a shaft word command.
    fn encode_shafts(&self, shaft_word: u64) -> Result<Vec<u8>, ProtocolError>;

    /// Encode a weave direction command, if the protocol has one.
    fn encode_direction(&self, forward: bool) -> Option<Vec<u8>>;

    /// Encode a status request, if the protocol has one.
    fn encode_status_request(&self) -> Option<Vec<u8>>;

    /// Decode one reply frame (without terminator).
    fn decode_reply(&self, frame: &[u8]) -> Result<LoomEvent, ProtocolError>;

    /// Decode one command frame (without terminator). Loom side.
    fn decode_command(&self, frame: &[u8]) -> Result<LoomCommand, ProtocolError>;

    /// Encode a reply, if the protocol can express it. Loom side.
    fn encode_reply(&self, event: &LoomEvent) -> Option<Vec<u8>>;
}

/// Protocol selector for configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Single-byte pick requests, raw shaft words.
    #[default]
    Binary,
    /// `=`-prefixed, `\r`-terminated text frames.
    Ascii,
}

impl ProtocolKind {
    /// Build the protocol for a loom with `num_shafts` shafts.
    pub fn build(self, num_shafts: u32) -> Arc<dyn LoomProtocol> {
        match self {
            Self::Binary => Arc::new(BinaryProtocol::new(num_shafts)),
            Self::Ascii => Arc::new(AsciiProtocol),
        }
    }
}

// ============================================================================
// Binary
// ============================================================================

/// Reply byte: pick wanted, weaving forward.
const PICK_FORWARD: u8 = 0x01;
/// Reply byte: pick wanted, weaving backward.
const PICK_BACKWARD: u8 = 0x02;

/// Binary protocol: fixed-size shaft words out, single-byte pick requests in.
#[derive(Debug, Clone)]
pub struct BinaryProtocol {
    num_bytes: usize,
}

impl BinaryProtocol {
    /// Protocol for `num_shafts` shafts (a multiple of 8).
    pub fn new(num_shafts: u32) -> Self {
        Self {
            num_bytes: num_shafts.div_ceil(8) as usize,
        }
    }
}

impl LoomProtocol for BinaryProtocol {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn reply_boundary(&self) -> FrameBoundary {
        FrameBoundary::Fixed(1)
    }

    fn command_boundary(&self) -> FrameBoundary {
        FrameBoundary::Fixed(self.num_bytes)
    }

    fn encode_shafts(&self, shaft_word: u64) -> Result<Vec<u8>, ProtocolError> {
        Ok(shaft_word_to_wire(shaft_word, self.num_bytes)?)
    }

    fn encode_direction(&self, _forward: bool) -> Option<Vec<u8>> {
        None
    }

    fn encode_status_request(&self) -> Option<Vec<u8>> {
        None
    }

    fn decode_reply(&self, frame: &[u8]) -> Result<LoomEvent, ProtocolError> {
        match frame {
            [PICK_FORWARD] => Ok(LoomEvent::PickRequest { forward: true }),
            [PICK_BACKWARD] => Ok(LoomEvent::PickRequest { forward: false }),
            _ => Err(ProtocolError::Unrecognized(frame.to_vec())),
        }
    }

    fn decode_command(&self, frame: &[u8]) -> Result<LoomCommand, ProtocolError> {
        Ok(LoomCommand::Shafts(wire_to_shaft_word(frame, self.num_bytes)?))
    }

    fn encode_reply(&self, event: &LoomEvent) -> Option<Vec<u8>> {
        match event {
            LoomEvent::PickRequest { forward: true } => Some(vec![PICK_FORWARD]),
            LoomEvent::PickRequest { forward: false } => Some(vec![PICK_BACKWARD]),
            _ => None,
        }
    }
}

// ============================================================================
// ASCII
// ============================================================================

/// ASCII protocol: `=` + opcode + payload + `\r`.
///
/// Host commands use upper-case opcodes, loom replies lower-case.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiProtocol;

impl AsciiProtocol {
    fn frame(opcode: u8, payload: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(payload.len() + 3);
        buf.push(ASCII_FRAME_START);
        buf.push(opcode);
        buf.extend_from_slice(payload.as_bytes());
        buf.push(TERMINATOR);
        buf
    }

    /// Split a frame into opcode and payload.
    fn split(frame: &[u8]) -> Result<(u8, &str), ProtocolError> {
        let [ASCII_FRAME_START, opcode, payload @ ..] = frame else {
            return Err(ProtocolError::Unrecognized(frame.to_vec()));
        };
        let payload = std::str::from_utf8(payload).map_err(|e| ProtocolError::Malformed {
            frame: frame.to_vec(),
            reason: e.to_string(),
        })?;
        Ok((*opcode, payload))
    }

    fn parse_hex(frame: &[u8], payload: &str) -> Result<u64, ProtocolError> {
        u64::from_str_radix(payload, 16).map_err(|e| ProtocolError::Malformed {
            frame: frame.to_vec(),
            reason: format!("bad hex value: {e}"),
        })
    }

    fn parse_direction(frame: &[u8], payload: &str) -> Result<bool, ProtocolError> {
        match payload {
            "0" => Ok(true),
            "1" => Ok(false),
            _ => Err(ProtocolError::Malformed {
                frame: frame.to_vec(),
                reason: "direction must be 0 or 1".to_string(),
            }),
        }
    }

    fn direction_digit(forward: bool) -> &'static str {
        if forward {
            "0"
        } else {
            "1"
        }
    }
}

impl LoomProtocol for AsciiProtocol {
    fn name(&self) -> &'static str {
        "ascii"
    }

    fn reply_boundary(&self) -> FrameBoundary {
        FrameBoundary::Terminated(TERMINATOR)
    }

    fn command_boundary(&self) -> FrameBoundary {
        FrameBoundary::Terminated(TERMINATOR)
    }

    fn encode_shafts(&self, shaft_word: u64) -> Result<Vec<u8>, ProtocolError> {
        Ok(Self::frame(b'C', &format!("{shaft_word:08x}")))
    }

    fn encode_direction(&self, forward: bool) -> Option<Vec<u8>> {
        Some(Self::frame(b'U', Self::direction_digit(forward)))
    }

    fn encode_status_request(&self) -> Option<Vec<u8>> {
        Some(Self::frame(b'S', ""))
    }

    fn decode_reply(&self, frame: &[u8]) -> Result<LoomEvent, ProtocolError> {
        let (opcode, payload) = Self::split(frame)?;
        match opcode {
            b'c' => Ok(LoomEvent::ShaftsAck(Self::parse_hex(frame, payload)?)),
            b'u' => Ok(LoomEvent::Direction {
                forward: Self::parse_direction(frame, payload)?,
            }),
            b's' => {
                let word = Self::parse_hex(frame, payload)?;
                let word = u32::try_from(word).map_err(|e| ProtocolError::Malformed {
                    frame: frame.to_vec(),
                    reason: e.to_string(),
                })?;
                Ok(LoomEvent::Status(LoomStatus::from_state_word(word)))
            }
            _ => Err(ProtocolError::Unrecognized(frame.to_vec())),
        }
    }

    fn decode_command(&self, frame: &[u8]) -> Result<LoomCommand, ProtocolError> {
        let (opcode, payload) = Self::split(frame)?;
        match opcode {
            b'C' => Ok(LoomCommand::Shafts(Self::parse_hex(frame, payload)?)),
            b'U' => Ok(LoomCommand::Direction {
                forward: Self::parse_direction(frame, payload)?,
            }),
            b'S' if payload.is_empty() => Ok(LoomCommand::StatusRequest),
            _ => Err(ProtocolError::Unrecognized(frame.to_vec())),
        }
    }

    fn encode_reply(&self, event: &LoomEvent) -> Option<Vec<u8>> {
        match event {
            LoomEvent::ShaftsAck(word) => Some(Self::frame(b'c', &format!("{word:08x}"))),
            LoomEvent::Direction { forward } => Some(Self::frame(b'u', Self::direction_digit(*forward))),
            LoomEvent::Status(status) => Some(Self::frame(b's', &format!("{:x}", status.to_state_word()))),
            LoomEvent::PickRequest { .. } => None,
        }
    }
}
