//! Shared helpers for the integration tests.
//!
//! Each test starts a real [`LoomServer`] on an ephemeral port with a
//! temporary pattern store and the simulated loom, then talks to it over a
//! WebSocket the way a browser client would.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use loom_server::{Config, LoomServer};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long to wait for any single reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A 4-pick, 4-shaft point twill. Pick `n` raises shaft `n`.
pub const TWILL_WIF: &str = "\
[WIF]
Version=1.1
[WEAVING]
Shafts=4
Rising Shed=true
[WEFT]
Color=2
[THREADING]
1=1
2=2
3=3
4=4
[LIFTPLAN]
1=1
2=2
3=3
4=4
";

/// Start a server on `127.0.0.1:0` with its store in `dir`.
pub async fn start_server_in(dir: &Path, configure: impl FnOnce(&mut Config)) -> LoomServer {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = Config {
        serial_port: "mock".to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        db_path: dir.join("patterns.json"),
        ..Config::default()
    };
    configure(&mut config);
    LoomServer::start(config).await.expect("server should start")
}

/// Start a server with a fresh store.
pub async fn start_server(configure: impl FnOnce(&mut Config)) -> (LoomServer, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server_in(dir.path(), configure).await;
    (server, dir)
}

/// A WebSocket client of the server under test.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to `server`.
    pub async fn connect(server: &LoomServer) -> Self {
        let url = format!("ws://{}", server.local_addr());
        let (ws, _response) = tokio::time::timeout(REPLY_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        Self { ws }
    }

    /// Connect and consume the session replay up to the pending jump report.
    pub async fn connect_and_drain(server: &LoomServer) -> Self {
        let mut client = Self::connect(server).await;
        client.recv_type("JumpPickNumber").await;
        client
    }

    /// Send a JSON command.
    pub async fn send(&mut self, command: Value) {
        self.send_text(&command.to_string()).await;
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.expect("send failed");
    }

    /// Send an out-of-band command to the simulated loom.
    pub async fn oob(&mut self, command: &str) {
        self.send(json!({"type": "oobcommand", "command": command})).await;
    }

    /// Upload the twill pattern as `name` and select it.
    pub async fn load_twill(&mut self, name: &str) {
        self.send(json!({"type": "file", "name": name, "data": TWILL_WIF})).await;
        self.recv_type("PatternNames").await;
        self.send(json!({"type": "select_pattern", "name": name})).await;
        self.recv_type("CurrentPickNumber").await;
    }

    /// Next message, which must be a JSON text frame.
    pub async fn recv(&mut self) -> Value {
        match self.recv_message().await {
            Message::Text(text) => serde_json::from_str(&text).expect("reply is not JSON"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    /// Next raw WebSocket message (skipping pings).
    pub async fn recv_message(&mut self) -> Message {
        loop {
            let message = tokio::time::timeout(REPLY_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection ended")
                .expect("read failed");
            if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
                return message;
            }
        }
    }

    /// Skip messages until one of type `kind` arrives.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let reply = self.recv().await;
            if reply["type"] == kind {
                return reply;
            }
        }
    }

    /// Skip messages until a `LoomConnectionState` with `state` arrives.
    pub async fn recv_connection_state(&mut self, state: &str) -> Value {
        loop {
            let reply = self.recv_type("LoomConnectionState").await;
            if reply["state"] == state {
                return reply;
            }
        }
    }

    /// Request one pick from the simulated loom and return the reported
    /// `(pick_number, repeat_number)`.
    pub async fn weave_pick(&mut self) -> (u64, i64) {
        self.oob("n").await;
        let reply = self.recv_type("CurrentPickNumber").await;
        (
            reply["pick_number"].as_u64().unwrap(),
            reply["repeat_number"].as_i64().unwrap(),
        )
    }
}
