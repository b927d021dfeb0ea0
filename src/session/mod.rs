//! Session orchestrator.
//!
//! The [`Session`] is the single owner of all mutable session state: the
//! current pattern and pending jump (via [`PickSequencer`]), the weave
//! direction, the last loom status, the pattern store, the [`LoomLink`] and
//! the active [`ClientConn`]. Everything else talks to it through
//! [`SessionEvent`]s.
//!
//! # Architecture
//!
//! ```text
//!  ClientServer ─ClientConnected─┐
//!  ClientConn   ─ClientMessage───┤
//!  LoomLink     ─LoomState───────┼──► mpsc ──► Session::run ──► ClientConn::send
//!  read loop    ─Loom{gen,..}────┤                   │
//!  main         ─Shutdown────────┘                   └──► LoomLink::write_shafts
//! ```
//!
//! Each event is handled to completion before the next is received, so
//! client commands and loom pick requests never interleave.
//!
//! Rust guideline compliant 2026-02

pub mod events;

use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::bits::shaft_word_from_flags;
use crate::client::{parse_command, ClientCommand, ClientConn, ClientReply, ParsedMessage, Severity};
use crate::config::{Config, DirectionControl};
use crate::loom::{ConnectionState, LinkError, LinkEvent, LoomEvent, LoomLink, LoomStatus, LoomTarget};
use crate::pattern::{read_pattern_file, PatternFileError, SequenceError};
use crate::sequencer::{JumpOverride, PickSequencer};
use crate::store::{JsonPatternStore, StoreError};

pub use events::{IncomingMessage, SessionEvent};

/// Close reason sent to a client replaced by a newer one.
pub const SUPERSEDED_REASON: &str = "superseded";

/// A client command that could not be carried out.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command needs a current pattern.
    #[error("no pattern selected")]
    NoPattern,
    /// Pick navigation failed.
    #[error(transparent)]
    Sequence(SequenceError),
    /// Pattern store failure (including unknown pattern names).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The uploaded pattern file was rejected.
    #[error(transparent)]
    PatternFile(#[from] PatternFileError),
    /// The loom link rejected the command.
    #[error(transparent)]
    Link(#[from] LinkError),
}

impl From<SequenceError> for CommandError {
    fn from(e: SequenceError) -> Self {
        match e {
            SequenceError::NoPattern => Self::NoPattern,
            other => Self::Sequence(other),
        }
    }
}

impl CommandError {
    /// Severity to report to the client.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Link(LinkError::Unsupported { .. } | LinkError::OobUnavailable) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Settings the session needs from [`Config`].
#[derive(Debug, Clone, Copy)]
struct Settings {
    num_shafts: u32,
    max_patterns: usize,
    direction_control: DirectionControl,
}

/// Session state owner and event loop.
#[derive(Debug)]
pub struct Session {
    settings: Settings,
    link: LoomLink,
    store: JsonPatternStore,
    sequencer: PickSequencer,
    forward: bool,
    loom_status: LoomStatus,
    client: Option<ClientConn>,
    event_rx: UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Build a session. The most recently used stored pattern becomes current.
    pub fn new(
        config: &Config,
        store: JsonPatternStore,
        event_tx: UnboundedSender<SessionEvent>,
        event_rx: UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let protocol = config.protocol.build(config.num_shafts);
        let link = LoomLink::new(LoomTarget::from_port(&config.serial_port), protocol, event_tx);

        let mut sequencer = PickSequencer::new();
        if let Some(pattern) = store.most_recent() {
            log::info!(
                "[Session] Resuming {:?} at pick {} repeat {}",
                pattern.name,
                pattern.pick_number,
                pattern.repeat_number
            );
            sequencer.set_pattern(pattern);
        }

        Self {
            settings: Settings {
                num_shafts: config.num_shafts,
                max_patterns: config.max_patterns,
                direction_control: config.direction_control,
            },
            link,
            store,
            sequencer,
            forward: true,
            loom_status: LoomStatus::default(),
            client: None,
            event_rx,
        }
    }

    /// Connect to the loom, then process events until shutdown.
    pub async fn run(mut self) {
        self.connect_loom().await;

        while let Some(event) = self.event_rx.recv().await {
            if matches!(event, SessionEvent::Shutdown) {
                log::info!("[Session] Shutdown requested");
                break;
            }
            self.handle_event(event).await;
        }

        self.link.disconnect().await;
        if let Some(client) = self.client.take() {
            client.close("server shutting down").await;
        }
        log::info!("[Session] Stopped");
    }

    async fn connect_loom(&mut self) {
        if let Err(e) = self.link.connect().await {
            log::warn!("[Session] Could not connect to loom {}: {e}", self.link.target());
        }
    }

    /// Queue a reply for the current client, if any.
    fn report(&self, reply: &ClientReply) {
        match &self.client {
            Some(client) => {
                if !client.send(reply) {
                    log::debug!("[Session] Client {} write channel closed", client.client_id());
                }
            }
            None => log::trace!("[Session] No client for {reply:?}"),
        }
    }

    fn report_problem(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => log::error!("[Session] {message}"),
            Severity::Warning => log::warn!("[Session] {message}"),
            Severity::Info => log::info!("[Session] {message}"),
        }
        self.report(&ClientReply::problem(severity, message));
    }

    fn report_pick_number(&self) {
        if let Some(pattern) = self.sequencer.pattern() {
            self.report(&ClientReply::CurrentPickNumber {
                pick_number: pattern.pick_number,
                repeat_number: pattern.repeat_number,
            });
        }
    }

    fn report_pattern_names(&self) {
        self.report(&ClientReply::PatternNames {
            names: self.store.list_names(),
        });
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ClientConnected { client_id, conn } => {
                self.handle_client_connected(client_id, conn).await;
            }
            SessionEvent::ClientMessage { client_id, message } => {
                if self.client.as_ref().map(ClientConn::client_id) != Some(client_id.as_str()) {
                    log::debug!("[Session] Dropping message from stale client {client_id}");
                    return;
                }
                self.handle_client_message(message).await;
            }
            SessionEvent::ClientDisconnected { client_id } => {
                if self.client.as_ref().map(ClientConn::client_id) == Some(client_id.as_str()) {
                    log::info!("[Session] Client {client_id} left");
                    if let Some(client) = self.client.take() {
                        client.disconnect();
                    }
                }
            }
            SessionEvent::LoomState { state, reason } => {
                self.report(&ClientReply::LoomConnectionState {
                    state,
                    reason: reason.unwrap_or_default(),
                });
            }
            SessionEvent::Loom { generation, event } => {
                if generation != self.link.generation() {
                    log::debug!("[Session] Dropping stale loom event from generation {generation}: {event:?}");
                    return;
                }
                self.handle_link_event(event).await;
            }
            SessionEvent::Shutdown => {}
        }
    }

    // ========================================================================
    // Client lifecycle
    // ========================================================================

    async fn handle_client_connected(&mut self, client_id: String, conn: ClientConn) {
        if let Some(old) = self.client.take() {
            log::info!("[Session] Client {} superseded by {}", old.client_id(), client_id);
            old.send(&ClientReply::problem(
                Severity::Warning,
                "Another client connected; this connection is closing",
            ));
            old.close(SUPERSEDED_REASON).await;
        }
        self.client = Some(conn);

        self.report(&ClientReply::LoomConnectionState {
            state: self.link.state(),
            reason: String::new(),
        });
        self.report_pattern_names();
        self.report(&ClientReply::WeaveDirection { forward: self.forward });
        self.sequencer.clear_jump();
        self.report(&ClientReply::JumpPickNumber(JumpOverride::default()));
        if let Some(pattern) = self.sequencer.pattern() {
            self.report(&ClientReply::ReducedPattern(pattern.clone()));
        }
        self.report_pick_number();

        if self.link.state() == ConnectionState::Connected {
            if self.link.supports_status_request() {
                if let Err(e) = self.link.request_status().await {
                    self.handle_link_error(e).await;
                }
            } else {
                self.report(&ClientReply::LoomState(self.loom_status));
            }
        } else {
            self.connect_loom().await;
        }
    }

    async fn handle_client_message(&mut self, message: IncomingMessage) {
        let text = match message {
            IncomingMessage::Text(text) => text,
            IncomingMessage::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    self.report_problem(Severity::Warning, format!("Ignoring binary message that is not UTF-8: {e}"));
                    return;
                }
            },
        };

        let command = match parse_command(&text) {
            ParsedMessage::Command(command) => command,
            ParsedMessage::Invalid(message) => {
                self.report_problem(Severity::Error, message);
                return;
            }
            ParsedMessage::Unusable(reason) => {
                log::warn!("[Session] Dropping client message ({reason}): {text:?}");
                return;
            }
        };

        log::debug!("[Session] Command {command:?}");
        if let Err(e) = self.handle_command(command).await {
            let transport_failed = matches!(e, CommandError::Link(LinkError::Transport(_)));
            self.report_problem(e.severity(), e.to_string());
            if transport_failed {
                self.link.disconnect().await;
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: ClientCommand) -> Result<(), CommandError> {
        match command {
            ClientCommand::ClearPatternNames => self.clear_pattern_names(),
            ClientCommand::LoadFile { name, data } => self.load_file(&name, &data),
            ClientCommand::JumpToPick {
                pick_number,
                repeat_number,
            } => {
                let jump = JumpOverride {
                    pick_number,
                    repeat_number,
                };
                self.sequencer.set_jump(jump)?;
                self.report(&ClientReply::JumpPickNumber(jump));
                Ok(())
            }
            ClientCommand::SelectPattern { name } => self.select_pattern(&name),
            ClientCommand::WeaveDirection { forward } => self.set_weave_direction(forward).await,
            ClientCommand::OobCommand { command } => {
                self.link.send_oob(&command)?;
                Ok(())
            }
        }
    }

    fn clear_pattern_names(&mut self) -> Result<(), CommandError> {
        self.store.clear()?;
        if let Some(pattern) = self.sequencer.pattern() {
            self.store.add(pattern, self.settings.max_patterns)?;
            self.store
                .update_progress(&pattern.name, pattern.pick_number, pattern.repeat_number)?;
        }
        self.report_pattern_names();
        Ok(())
    }

    fn load_file(&mut self, name: &str, data: &str) -> Result<(), CommandError> {
        let pattern = read_pattern_file(name, data, self.settings.num_shafts as usize)?;
        log::info!("[Session] Loaded {:?} ({} picks)", pattern.name, pattern.num_picks());
        self.store.add(&pattern, self.settings.max_patterns)?;
        self.report_pattern_names();
        Ok(())
    }

    fn select_pattern(&mut self, name: &str) -> Result<(), CommandError> {
        if self.sequencer.pattern_name() == Some(name) {
            return Ok(());
        }
        let pattern = self.store.get(name)?;

        if let Some(old) = self.sequencer.pattern() {
            if let Err(e) = self.store.update_progress(&old.name, old.pick_number, old.repeat_number) {
                log::warn!("[Session] Could not save progress of {:?}: {e}", old.name);
            }
        }
        self.store
            .update_progress(&pattern.name, pattern.pick_number, pattern.repeat_number)?;

        log::info!("[Session] Selected {:?}", pattern.name);
        self.sequencer.set_pattern(pattern);
        if self.sequencer.clear_jump() {
            self.report(&ClientReply::JumpPickNumber(JumpOverride::default()));
        }
        if let Some(pattern) = self.sequencer.pattern() {
            self.report(&ClientReply::ReducedPattern(pattern.clone()));
        }
        self.report_pick_number();
        Ok(())
    }

    async fn set_weave_direction(&mut self, forward: bool) -> Result<(), CommandError> {
        match self.settings.direction_control {
            DirectionControl::Client => {
                self.forward = forward;
                self.report(&ClientReply::WeaveDirection { forward });
                if self.link.state() == ConnectionState::Connected && self.link.supports_direction() {
                    self.link.set_direction(forward).await?;
                }
            }
            DirectionControl::Loom => {
                // The loom confirms with a direction event
                self.link.set_direction(forward).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Loom events
    // ========================================================================

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Reply(LoomEvent::ShaftsAck(word)) => {
                log::debug!("[Session] Loom raised shafts {word:#x}");
            }
            LinkEvent::Reply(LoomEvent::Direction { forward }) => self.handle_loom_direction(forward),
            LinkEvent::Reply(LoomEvent::Status(status)) => {
                self.loom_status = status;
                self.report(&ClientReply::LoomState(status));
                if status.pick_wanted {
                    self.serve_pick().await;
                }
            }
            LinkEvent::Reply(LoomEvent::PickRequest { forward }) => {
                self.handle_loom_direction(forward);
                self.loom_status.pick_wanted = true;
                self.serve_pick().await;
            }
            LinkEvent::Problem(e) => self.report_problem(Severity::Warning, e.to_string()),
            LinkEvent::Failed(reason) => {
                self.report_problem(Severity::Error, format!("Loom connection lost: {reason}"));
                self.link.disconnect().await;
            }
        }
    }

    fn handle_loom_direction(&mut self, forward: bool) {
        match self.settings.direction_control {
            DirectionControl::Loom => {
                if forward != self.forward {
                    self.forward = forward;
                    self.report(&ClientReply::WeaveDirection { forward });
                }
            }
            DirectionControl::Client => {
                if forward != self.forward {
                    log::debug!("[Session] Ignoring loom direction (client controls direction)");
                }
            }
        }
    }

    /// Send the next pick to the loom.
    async fn serve_pick(&mut self) {
        if self.sequencer.pattern().is_none() {
            log::info!("[Session] Loom wants a pick but no pattern is selected");
            return;
        }
        let checkpoint = self.sequencer.checkpoint();
        let step = match self.sequencer.next_pick(self.forward) {
            Ok(step) => step,
            Err(e) => {
                self.report_problem(Severity::Error, format!("Could not compute next pick: {e}"));
                return;
            }
        };

        let shaft_word = shaft_word_from_flags(&step.pick.are_shafts_up);
        if let Err(e) = self.link.write_shafts(shaft_word).await {
            // The loom never got this pick; serve it again on the next request
            if let Some(checkpoint) = checkpoint {
                self.sequencer.restore(checkpoint);
            }
            self.handle_link_error(e).await;
            return;
        }
        self.loom_status.pick_wanted = false;

        if step.jump_consumed {
            self.report(&ClientReply::JumpPickNumber(JumpOverride::default()));
        }
        self.report(&ClientReply::CurrentPickNumber {
            pick_number: step.pick_number,
            repeat_number: step.repeat_number,
        });

        if let Some(name) = self.sequencer.pattern_name() {
            if let Err(e) = self.store.update_progress(name, step.pick_number, step.repeat_number) {
                log::warn!("[Session] Could not save progress of {name:?}: {e}");
            }
        }
    }

    async fn handle_link_error(&mut self, e: LinkError) {
        match e {
            LinkError::Transport(_) => {
                self.report_problem(Severity::Error, e.to_string());
                self.link.disconnect().await;
            }
            LinkError::Unsupported { .. } | LinkError::OobUnavailable => {
                self.report_problem(Severity::Warning, e.to_string());
            }
            LinkError::NotConnected | LinkError::Protocol(_) => {
                self.report_problem(Severity::Error, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::ProtocolError;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    struct Harness {
        session: Session,
        client: WebSocketStream<DuplexStream>,
        _dir: tempfile::TempDir,
    }

    /// A session with one attached client over an in-memory WebSocket.
    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("patterns.json"),
            ..Config::default()
        };
        let store = JsonPatternStore::open(&config.db_path).unwrap();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(&config, store, event_tx.clone(), event_rx);

        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let conn = ClientConn::new("client:test".to_string(), server_ws, event_tx);
        session
            .handle_event(SessionEvent::ClientConnected {
                client_id: "client:test".to_string(),
                conn,
            })
            .await;

        let mut harness = Harness {
            session,
            client,
            _dir: dir,
        };
        // replay: connection state, names, direction, jump
        for _ in 0..4 {
            next_reply(&mut harness.client).await;
        }
        harness
    }

    async fn next_reply(client: &mut WebSocketStream<DuplexStream>) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for reply")
            .expect("stream ended")
            .expect("read failed");
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected message {other:?}"),
        }
    }

    async fn loom_event(harness: &mut Harness, event: LinkEvent) {
        let generation = harness.session.link.generation();
        harness
            .session
            .handle_event(SessionEvent::Loom { generation, event })
            .await;
    }

    #[tokio::test]
    async fn test_unrecognized_frame_reports_single_warning() {
        let mut h = harness().await;
        loom_event(&mut h, LinkEvent::Problem(ProtocolError::Unrecognized(vec![0x03]))).await;

        let reply = next_reply(&mut h.client).await;
        assert_eq!(reply["type"], "CommandProblem");
        assert_eq!(reply["severity"], "warning");
        assert!(reply["message"].as_str().unwrap().contains("\\x03"));

        // the session keeps going
        h.session
            .handle_event(SessionEvent::ClientMessage {
                client_id: "client:test".to_string(),
                message: IncomingMessage::Text(json!({"type": "weave_direction", "forward": false}).to_string()),
            })
            .await;
        assert_eq!(next_reply(&mut h.client).await, json!({"type": "WeaveDirection", "forward": false}));
    }

    #[tokio::test]
    async fn test_stale_generation_is_dropped() {
        let mut h = harness().await;
        let stale = h.session.link.generation() - 1;
        h.session
            .handle_event(SessionEvent::Loom {
                generation: stale,
                event: LinkEvent::Problem(ProtocolError::Unrecognized(vec![0x03])),
            })
            .await;
        h.session
            .handle_event(SessionEvent::LoomState {
                state: ConnectionState::Connected,
                reason: None,
            })
            .await;

        let reply = next_reply(&mut h.client).await;
        assert_eq!(reply, json!({"type": "LoomConnectionState", "state": "connected", "reason": ""}));
    }

    #[tokio::test]
    async fn test_pick_request_without_pattern_is_ignored() {
        let mut h = harness().await;
        loom_event(&mut h, LinkEvent::Reply(LoomEvent::PickRequest { forward: true })).await;
        let status = LoomStatus {
            pick_wanted: true,
            ..LoomStatus::default()
        };
        loom_event(&mut h, LinkEvent::Reply(LoomEvent::Status(status))).await;

        let reply = next_reply(&mut h.client).await;
        assert_eq!(reply["type"], "LoomState");
        assert_eq!(reply["pick_wanted"], true);
    }

    #[tokio::test]
    async fn test_failed_shaft_write_keeps_jump_and_position() {
        let mut h = harness().await;
        h.session
            .sequencer
            .set_pattern(crate::pattern::tests::sample_pattern("p", 6, 8));
        let jump = JumpOverride {
            pick_number: Some(3),
            repeat_number: None,
        };
        h.session.sequencer.set_jump(jump).unwrap();
        h.session.loom_status.pick_wanted = true;

        // the link was never connected, so the write fails
        loom_event(&mut h, LinkEvent::Reply(LoomEvent::PickRequest { forward: true })).await;

        let reply = next_reply(&mut h.client).await;
        assert_eq!(reply["type"], "CommandProblem");
        assert_eq!(reply["severity"], "error");
        assert!(reply["message"].as_str().unwrap().contains("not connected"));

        assert_eq!(h.session.sequencer.jump(), jump);
        assert_eq!(h.session.sequencer.pattern().unwrap().pick_number, 0);
        assert!(h.session.loom_status.pick_wanted);

        // nothing else was reported for the lost pick
        h.session.report(&ClientReply::WeaveDirection { forward: true });
        assert_eq!(next_reply(&mut h.client).await, json!({"type": "WeaveDirection", "forward": true}));
    }

    #[tokio::test]
    async fn test_messages_from_other_clients_are_ignored() {
        let mut h = harness().await;
        h.session
            .handle_event(SessionEvent::ClientMessage {
                client_id: "client:other".to_string(),
                message: IncomingMessage::Text(json!({"type": "weave_direction", "forward": false}).to_string()),
            })
            .await;
        h.session
            .handle_event(SessionEvent::ClientMessage {
                client_id: "client:test".to_string(),
                message: IncomingMessage::Binary(vec![0xff, 0xfe]),
            })
            .await;

        let reply = next_reply(&mut h.client).await;
        assert_eq!(reply["type"], "CommandProblem");
        assert_eq!(reply["severity"], "warning");
        assert!(h.session.forward);
    }

    #[tokio::test]
    async fn test_loom_direction_ignored_under_client_control() {
        let mut h = harness().await;
        loom_event(&mut h, LinkEvent::Reply(LoomEvent::Direction { forward: false })).await;
        assert!(h.session.forward);
    }

    #[test]
    fn test_command_error_severity() {
        assert_eq!(CommandError::NoPattern.severity(), Severity::Error);
        let unsupported = CommandError::Link(LinkError::Unsupported {
            what: "weave direction",
            protocol: "binary",
        });
        assert_eq!(unsupported.severity(), Severity::Warning);
        assert_eq!(CommandError::Link(LinkError::OobUnavailable).severity(), Severity::Warning);
        assert_eq!(CommandError::Link(LinkError::NotConnected).severity(), Severity::Error);
    }

    #[test]
    fn test_sequence_error_conversion() {
        assert!(matches!(CommandError::from(SequenceError::NoPattern), CommandError::NoPattern));
        let err = CommandError::from(SequenceError::OutOfRange { pick_number: 9, num_picks: 4 });
        assert_eq!(err.to_string(), "pick_number=9 not in range [0, 4]");
    }
}
