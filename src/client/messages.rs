//! JSON messages exchanged with the client.
//!
//! Every message is a JSON object tagged by `"type"`. Incoming commands use
//! snake_case type names, outgoing reports use PascalCase:
//!
//! ```text
//! → {"type": "jump_to_pick", "pick_number": 7, "repeat_number": null}
//! ← {"type": "JumpPickNumber", "pick_number": 7, "repeat_number": null}
//! ```
//!
//! Parsing is two-step so errors can be graded: a message that is not a JSON
//! object with a string `type` has no usable structure and is dropped; a
//! message with a `type` that does not parse into a [`ClientCommand`] is
//! reported back to the client.

use serde::{Deserialize, Serialize};

use crate::loom::{ConnectionState, LoomStatus};
use crate::pattern::Pattern;
use crate::sequencer::JumpOverride;

/// Severity of a [`ClientReply::CommandProblem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Something was ignored; the session is fine.
    Warning,
    /// A command failed.
    Error,
}

/// Command from the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Remove every stored pattern except the current one.
    ClearPatternNames,
    /// Upload a pattern file.
    #[serde(rename = "file")]
    LoadFile {
        /// File name; its suffix selects the format.
        name: String,
        /// File contents.
        data: String,
    },
    /// Stage a jump for the next pick.
    JumpToPick {
        /// Pick number to jump to.
        #[serde(default)]
        pick_number: Option<i64>,
        /// Repeat number to jump to.
        #[serde(default)]
        repeat_number: Option<i64>,
    },
    /// Make a stored pattern current.
    SelectPattern {
        /// Pattern name.
        name: String,
    },
    /// Set the weave direction.
    WeaveDirection {
        /// True for forward.
        forward: bool,
    },
    /// Out-of-band command for the simulated loom.
    #[serde(rename = "oobcommand")]
    OobCommand {
        /// Raw command string.
        command: String,
    },
}

/// Report sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    /// A problem with a command or with loom traffic.
    CommandProblem {
        /// Human-readable description.
        message: String,
        /// How bad it is.
        severity: Severity,
    },
    /// Current pick and repeat numbers.
    CurrentPickNumber {
        /// Pick number.
        pick_number: usize,
        /// Repeat number.
        repeat_number: i64,
    },
    /// Pending jump (both null when none).
    JumpPickNumber(JumpOverride),
    /// Loom link state.
    LoomConnectionState {
        /// State.
        state: ConnectionState,
        /// Failure reason, empty otherwise.
        reason: String,
    },
    /// Latest loom status.
    LoomState(LoomStatus),
    /// Stored pattern names, oldest first.
    PatternNames {
        /// Names.
        names: Vec<String>,
    },
    /// The current pattern.
    ReducedPattern(Pattern),
    /// Weave direction.
    WeaveDirection {
        /// True for forward.
        forward: bool,
    },
}

impl ClientReply {
    /// Shorthand for a [`ClientReply::CommandProblem`].
    pub fn problem(severity: Severity, message: impl Into<String>) -> Self {
        Self::CommandProblem {
            message: message.into(),
            severity,
        }
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Outcome of parsing an incoming text message.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedMessage {
    /// A valid command.
    Command(ClientCommand),
    /// Has a `type` but is not a valid command; reply with this message.
    Invalid(String),
    /// No usable structure; log and drop.
    Unusable(String),
}

/// Parse an incoming text message.
pub fn parse_command(text: &str) -> ParsedMessage {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return ParsedMessage::Unusable(format!("not JSON: {e}")),
    };
    let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
        return ParsedMessage::Unusable("no \"type\" field".to_string());
    };
    let kind = kind.to_string();
    match serde_json::from_value::<ClientCommand>(value) {
        Ok(command) => ParsedMessage::Command(command),
        Err(e) => ParsedMessage::Invalid(format!("invalid command {kind:?}: {e}")),
    }
}
