//! Simulated loom.
//!
//! [`MockLoom`] speaks the loom side of a [`LoomProtocol`] over any byte
//! stream (normally one end of a `tokio::io::duplex` pipe) and takes
//! out-of-band controls that stand in for the weaver:
//!
//! | control | effect |
//! |---|---|
//! | `n` | request the next pick |
//! | `d` | toggle weave direction |
//! | `c` | close the connection |
//!
//! Shaft words are only accepted while a pick is wanted, as on real looms.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::framing::LoomFrameDecoder;
use super::protocol::LoomProtocol;
use super::{LoomCommand, LoomEvent, LoomStatus};
use crate::constants::{LOOM_READER_STOP_TIMEOUT, LOOM_READ_BUFFER_SIZE};

/// Outcome of an out-of-band control.
#[derive(Debug, PartialEq, Eq)]
enum Control {
    /// Send these frames to the host.
    Reply(Vec<Vec<u8>>),
    /// Close the connection.
    Close,
}

/// Simulated loom state.
#[derive(Debug)]
pub struct MockLoom {
    protocol: Arc<dyn LoomProtocol>,
    shaft_word: u64,
    pick_wanted: bool,
    forward: bool,
}

/// Handle to a running [`MockLoom`] task.
pub struct MockLoomHandle {
    control_tx: UnboundedSender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for MockLoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLoomHandle")
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl MockLoomHandle {
    /// Queue an out-of-band control. Returns `false` if the mock has stopped.
    pub fn send_oob(&self, command: &str) -> bool {
        self.control_tx.send(command.to_string()).is_ok()
    }

    /// Stop the mock and wait for its task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        if tokio::time::timeout(LOOM_READER_STOP_TIMEOUT, self.task).await.is_err() {
            log::warn!("[MockLoom] Task did not stop in time; aborting");
            abort.abort();
        }
    }
}

impl MockLoom {
    /// New mock loom, weaving forward with no pick wanted.
    pub fn new(protocol: Arc<dyn LoomProtocol>) -> Self {
        Self {
            protocol,
            shaft_word: 0,
            pick_wanted: false,
            forward: true,
        }
    }

    /// Shafts currently raised.
    pub fn shaft_word(&self) -> u64 {
        self.shaft_word
    }

    /// Whether the mock is waiting for a shaft word.
    pub fn pick_wanted(&self) -> bool {
        self.pick_wanted
    }

    /// Current weave direction.
    pub fn forward(&self) -> bool {
        self.forward
    }

    fn status(&self) -> LoomStatus {
        LoomStatus {
            shed_fully_closed: self.pick_wanted,
            pick_wanted: self.pick_wanted,
            error: false,
        }
    }

    /// Run the mock on `stream` in a new task.
    pub fn spawn<S>(self, stream: S) -> MockLoomHandle
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(stream, control_rx, cancel.clone()));
        MockLoomHandle {
            control_tx,
            cancel,
            task,
        }
    }

    async fn run<S>(mut self, stream: S, mut control_rx: UnboundedReceiver<String>, cancel: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut decoder = LoomFrameDecoder::new(self.protocol.command_boundary());
        let mut buf = [0u8; LOOM_READ_BUFFER_SIZE];
        log::info!("[MockLoom] Started ({} protocol)", self.protocol.name());

        loop {
            let replies = tokio::select! {
                () = cancel.cancelled() => break,

                Some(command) = control_rx.recv() => match self.handle_oob(&command) {
                    Control::Reply(replies) => replies,
                    Control::Close => {
                        log::info!("[MockLoom] Closing connection on request");
                        break;
                    }
                },

                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        log::info!("[MockLoom] Host closed the connection");
                        break;
                    }
                    Ok(n) => {
                        let mut replies = Vec::new();
                        for frame in decoder.feed(&buf[..n]) {
                            match frame.and_then(|f| self.protocol.decode_command(&f)) {
                                Ok(command) => replies.extend(self.handle_command(command)),
                                Err(e) => log::warn!("[MockLoom] Ignoring bad command: {e}"),
                            }
                        }
                        replies
                    }
                    Err(e) => {
                        log::warn!("[MockLoom] Read error: {e}");
                        break;
                    }
                },
            };

            for reply in replies {
                if let Err(e) = writer.write_all(&reply).await {
                    log::warn!("[MockLoom] Write error: {e}");
                    return;
                }
            }
            if let Err(e) = writer.flush().await {
                log::warn!("[MockLoom] Flush error: {e}");
                return;
            }
        }

        if let Err(e) = writer.shutdown().await {
            log::debug!("[MockLoom] Shutdown error: {e}");
        }
        log::info!("[MockLoom] Stopped");
    }

    fn encode(&self, event: &LoomEvent) -> Option<Vec<u8>> {
        self.protocol.encode_reply(event)
    }

    fn handle_oob(&mut self, command: &str) -> Control {
        match command.trim() {
            "n" => {
                self.pick_wanted = true;
                let request = self
                    .encode(&LoomEvent::PickRequest { forward: self.forward })
                    .or_else(|| self.encode(&LoomEvent::Status(self.status())));
                Control::Reply(request.into_iter().collect())
            }
            "d" => {
                self.forward = !self.forward;
                log::info!("[MockLoom] Direction now {}", if self.forward { "forward" } else { "backward" });
                Control::Reply(self.encode(&LoomEvent::Direction { forward: self.forward }).into_iter().collect())
            }
            "c" => Control::Close,
            other => {
                log::warn!("[MockLoom] Unknown out-of-band command {other:?}");
                Control::Reply(Vec::new())
            }
        }
    }

    fn handle_command(&mut self, command: LoomCommand) -> Vec<Vec<u8>> {
        match command {
            LoomCommand::Shafts(word) => {
                if !self.pick_wanted {
                    log::warn!("[MockLoom] Shaft word {word:#x} ignored: no pick wanted");
                    return Vec::new();
                }
                self.shaft_word = word;
                self.pick_wanted = false;
                log::debug!("[MockLoom] Raised shafts {word:#x}");
                self.encode(&LoomEvent::ShaftsAck(word)).into_iter().collect()
            }
            LoomCommand::Direction { forward } => {
                self.forward = forward;
                self.encode(&LoomEvent::Direction { forward }).into_iter().collect()
            }
            LoomCommand::StatusRequest => self.encode(&LoomEvent::Status(self.status())).into_iter().collect(),
        }
    }
}
