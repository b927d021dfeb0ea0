//! Loom connection lifecycle.
//!
//! [`LoomLink`] is owned by the session loop. It opens the transport (serial
//! port or in-process [`MockLoom`]), spawns a read loop that turns frames into
//! [`SessionEvent::Loom`] events, and writes encoded commands.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      └──────────err───────────┘              disconnect
//!      │                                           ▼
//!      └──────────────────────────────────── Disconnecting
//! ```
//!
//! Every transition is announced with [`SessionEvent::LoomState`]. Each
//! connect or disconnect bumps the link generation; read loop events carry
//! the generation they were produced under so the session can drop events
//! from a connection that no longer exists.
//!
//! Rust guideline compliant 2026-02

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use super::framing::LoomFrameDecoder;
use super::mock::{MockLoom, MockLoomHandle};
use super::protocol::LoomProtocol;
use super::{ConnectionState, LinkError, LinkEvent};
use crate::constants::{BAUD_RATE, LOOM_READER_STOP_TIMEOUT, LOOM_READ_BUFFER_SIZE, MOCK_PIPE_CAPACITY, MOCK_PORT_NAME};
use crate::session::events::SessionEvent;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the loom is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoomTarget {
    /// A serial device path.
    Serial(String),
    /// The in-process simulated loom.
    Mock,
}

impl LoomTarget {
    /// Parse a serial port argument; `"mock"` selects the simulated loom.
    pub fn from_port(port: &str) -> Self {
        if port == MOCK_PORT_NAME {
            Self::Mock
        } else {
            Self::Serial(port.to_string())
        }
    }
}

impl std::fmt::Display for LoomTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial(path) => f.write_str(path),
            Self::Mock => f.write_str(MOCK_PORT_NAME),
        }
    }
}

/// Resources of an open connection.
struct ActiveConnection {
    writer: BoxedWriter,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    mock: Option<MockLoomHandle>,
}

/// Link to the loom.
pub struct LoomLink {
    target: LoomTarget,
    protocol: Arc<dyn LoomProtocol>,
    event_tx: UnboundedSender<SessionEvent>,
    state: ConnectionState,
    generation: u64,
    active: Option<ActiveConnection>,
}

impl std::fmt::Debug for LoomLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoomLink")
            .field("target", &self.target)
            .field("protocol", &self.protocol.name())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl LoomLink {
    /// Create a disconnected link.
    pub fn new(target: LoomTarget, protocol: Arc<dyn LoomProtocol>, event_tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            target,
            protocol,
            event_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            active: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current generation; read loop events from other generations are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The wire protocol.
    pub fn protocol(&self) -> &dyn LoomProtocol {
        self.protocol.as_ref()
    }

    /// Where the link connects to.
    pub fn target(&self) -> &LoomTarget {
        &self.target
    }

    fn set_state(&mut self, state: ConnectionState, reason: Option<String>) {
        match &reason {
            Some(reason) => log::info!("[LoomLink] {} ({})", state, reason),
            None => log::info!("[LoomLink] {}", state),
        }
        self.state = state;
        if self.event_tx.send(SessionEvent::LoomState { state, reason }).is_err() {
            log::debug!("[LoomLink] Session channel closed; state change not delivered");
        }
    }

    /// Connect, disconnecting first if needed.
    ///
    /// On failure the link ends up `Disconnected` (announced with the reason)
    /// and the error is returned.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        if self.state != ConnectionState::Disconnected || self.active.is_some() {
            self.disconnect().await;
        }
        self.generation += 1;
        self.set_state(ConnectionState::Connecting, None);

        let (reader, writer, mock) = match self.open() {
            Ok(parts) => parts,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                return Err(e);
            }
        };

        self.set_state(ConnectionState::Connected, None);
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            self.generation,
            reader,
            Arc::clone(&self.protocol),
            self.event_tx.clone(),
            cancel.clone(),
        ));
        self.active = Some(ActiveConnection {
            writer,
            cancel,
            reader,
            mock,
        });
        Ok(())
    }

    fn open(&self) -> Result<(BoxedReader, BoxedWriter, Option<MockLoomHandle>), LinkError> {
        match &self.target {
            LoomTarget::Serial(path) => {
                let port = tokio_serial::new(path, BAUD_RATE)
                    .open_native_async()
                    .map_err(|e| LinkError::Transport(format!("could not open {path}: {e}")))?;
                let (reader, writer) = tokio::io::split(port);
                Ok((Box::new(reader), Box::new(writer), None))
            }
            LoomTarget::Mock => {
                let (host, device) = tokio::io::duplex(MOCK_PIPE_CAPACITY);
                let mock = MockLoom::new(Arc::clone(&self.protocol)).spawn(device);
                let (reader, writer) = tokio::io::split(host);
                Ok((Box::new(reader), Box::new(writer), Some(mock)))
            }
        }
    }

    /// Disconnect. Always ends `Disconnected`; no-op if already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected && self.active.is_none() {
            return;
        }
        self.generation += 1;
        self.set_state(ConnectionState::Disconnecting, None);

        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            let abort = active.reader.abort_handle();
            if tokio::time::timeout(LOOM_READER_STOP_TIMEOUT, active.reader).await.is_err() {
                log::warn!("[LoomLink] Read loop did not stop in time; aborting");
                abort.abort();
            }
            let mut writer = active.writer;
            if let Err(e) = writer.shutdown().await {
                log::debug!("[LoomLink] Transport shutdown error: {e}");
            }
            if let Some(mock) = active.mock {
                mock.shutdown().await;
            }
        }

        self.set_state(ConnectionState::Disconnected, None);
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let active = self.active.as_mut().ok_or(LinkError::NotConnected)?;
        active
            .writer
            .write_all(bytes)
            .await
            .map_err(|e| LinkError::Transport(format!("write failed: {e}")))?;
        active
            .writer
            .flush()
            .await
            .map_err(|e| LinkError::Transport(format!("flush failed: {e}")))
    }

    /// Send a shaft word.
    pub async fn write_shafts(&mut self, shaft_word: u64) -> Result<(), LinkError> {
        let bytes = self.protocol.encode_shafts(shaft_word)?;
        log::debug!("[LoomLink] Shafts {shaft_word:#x}");
        self.write(&bytes).await
    }

    /// Whether the protocol can command weave direction.
    pub fn supports_direction(&self) -> bool {
        self.protocol.encode_direction(true).is_some()
    }

    /// Send a weave direction command.
    pub async fn set_direction(&mut self, forward: bool) -> Result<(), LinkError> {
        let bytes = self.protocol.encode_direction(forward).ok_or(LinkError::Unsupported {
            what: "weave direction",
            protocol: self.protocol.name(),
        })?;
        self.write(&bytes).await
    }

    /// Whether the protocol can request status.
    pub fn supports_status_request(&self) -> bool {
        self.protocol.encode_status_request().is_some()
    }

    /// Ask the loom for a status report.
    pub async fn request_status(&mut self) -> Result<(), LinkError> {
        let bytes = self.protocol.encode_status_request().ok_or(LinkError::Unsupported {
            what: "status request",
            protocol: self.protocol.name(),
        })?;
        self.write(&bytes).await
    }

    /// Pass an out-of-band command to the simulated loom.
    pub fn send_oob(&self, command: &str) -> Result<(), LinkError> {
        let active = self.active.as_ref().ok_or(LinkError::NotConnected)?;
        let mock = active.mock.as_ref().ok_or(LinkError::OobUnavailable)?;
        if mock.send_oob(command) {
            Ok(())
        } else {
            Err(LinkError::Transport("mock loom has stopped".to_string()))
        }
    }
}

/// Read loop - decodes frames and forwards them as session events.
async fn read_loop(
    generation: u64,
    mut reader: BoxedReader,
    protocol: Arc<dyn LoomProtocol>,
    event_tx: UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut decoder = LoomFrameDecoder::new(protocol.reply_boundary());
    let mut buf = [0u8; LOOM_READ_BUFFER_SIZE];
    let send = |event: LinkEvent| event_tx.send(SessionEvent::Loom { generation, event }).is_ok();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                log::debug!("[LoomLink] Read loop {generation} cancelled");
                break;
            }
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    send(LinkEvent::Failed("loom closed the connection".to_string()));
                    break;
                }
                Ok(n) => {
                    for frame in decoder.feed(&buf[..n]) {
                        let event = match frame.and_then(|f| protocol.decode_reply(&f)) {
                            Ok(reply) => LinkEvent::Reply(reply),
                            Err(e) => LinkEvent::Problem(e),
                        };
                        if !send(event) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    send(LinkEvent::Failed(format!("read failed: {e}")));
                    break;
                }
            },
        }
    }
}
