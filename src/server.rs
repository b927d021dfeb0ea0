//! Server assembly.
//!
//! [`LoomServer`] wires the pattern store, loom link, client listener and
//! session loop together. `main` and the integration tests both start the
//! server through it.
//!
//! Rust guideline compliant 2026-02

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::ClientServer;
use crate::config::Config;
use crate::session::{Session, SessionEvent};
use crate::store::JsonPatternStore;

/// A running loom server.
#[derive(Debug)]
pub struct LoomServer {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    listener: ClientServer,
    session: JoinHandle<()>,
}

impl LoomServer {
    /// Validate `config`, open the pattern store, bind the client listener and
    /// spawn the session loop (which connects to the loom).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the pattern store
    /// cannot be opened, or the listen address cannot be bound. A loom that
    /// cannot be opened is not an error; the session retries when a client
    /// connects.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        if config.reset_db {
            log::info!("[Server] Resetting pattern store {}", config.db_path.display());
            JsonPatternStore::reset(&config.db_path)?;
        }
        let store = JsonPatternStore::open(&config.db_path)
            .with_context(|| format!("Failed to open pattern store {}", config.db_path.display()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let listener = ClientServer::start(&config.listen_addr, event_tx.clone()).await?;

        let session = Session::new(&config, store, event_tx.clone(), event_rx);
        log::info!(
            "[Server] Loom {:?}, {} shafts, {:?} protocol, {:?} direction control",
            config.serial_port,
            config.num_shafts,
            config.protocol,
            config.direction_control
        );
        let session = tokio::spawn(session.run());

        Ok(Self {
            event_tx,
            listener,
            session,
        })
    }

    /// Address the client listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Stop accepting clients, close the loom link and the active client,
    /// and wait for the session loop to finish.
    pub async fn shutdown(self) {
        log::info!("[Server] Shutting down");
        self.listener.shutdown();
        if self.event_tx.send(SessionEvent::Shutdown).is_err() {
            log::debug!("[Server] Session loop already stopped");
        }
        if let Err(e) = self.session.await {
            log::error!("[Server] Session task failed: {e}");
        }
    }
}
