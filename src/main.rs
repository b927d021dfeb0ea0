//! Loom server CLI.
//!
//! This is the main binary entry point. See the `loom_server` library for
//! the core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use loom_server::{Config, DirectionControl, LoomServer, ProtocolKind};

// CLI
#[derive(Parser)]
#[command(name = "loom-server")]
#[command(version)]
#[command(about = "Drive a computer-controlled dobby loom from a web client")]
struct Cli {
    /// Serial port of the loom, or "mock" for a simulated loom
    serial_port: Option<String>,

    /// Address to listen on for the WebSocket client
    #[arg(long)]
    listen: Option<String>,

    /// Path of the pattern store
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Delete the pattern store before starting
    #[arg(long)]
    reset_db: bool,

    /// Number of shafts on the loom (multiple of 8)
    #[arg(long)]
    num_shafts: Option<u32>,

    /// Loom wire protocol
    #[arg(long, value_enum)]
    protocol: Option<ProtocolKind>,

    /// Which side decides the weave direction
    #[arg(long, value_enum)]
    direction_control: Option<DirectionControl>,

    /// Maximum number of stored patterns (0 for unlimited)
    #[arg(long)]
    max_patterns: Option<usize>,

    /// Log at debug level
    #[arg(long, short)]
    verbose: bool,

    /// Write the log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line values over `config`.
    fn apply_to(self, config: &mut Config) {
        if let Some(port) = self.serial_port {
            config.serial_port = port;
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(db_path) = self.db_path {
            config.db_path = db_path;
        }
        config.reset_db |= self.reset_db;
        if let Some(num_shafts) = self.num_shafts {
            config.num_shafts = num_shafts;
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(direction_control) = self.direction_control {
            config.direction_control = direction_control;
        }
        if let Some(max_patterns) = self.max_patterns {
            config.max_patterns = max_patterns;
        }
    }
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Some(path) = log_file {
        let file = std::fs::File::create(path).with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.format_timestamp_millis().init();
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => log::info!("Received Ctrl-C"),
                    _ = sigterm.recv() => log::info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => log::warn!("Could not install SIGTERM handler: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for Ctrl-C: {e}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_ref())?;

    let mut config = Config::default();
    config.apply_env_overrides();
    cli.apply_to(&mut config);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async {
        let server = LoomServer::start(config).await?;
        log::info!("Loom server ready on ws://{}", server.local_addr());

        shutdown_signal().await;
        server.shutdown().await;
        Ok(())
    })
}
