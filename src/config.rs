//! Server configuration.
//!
//! Built from defaults, then `LOOM_SERVER_*` environment variables, then
//! command-line arguments (applied by `main`), in increasing precedence.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_DIR_NAME, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_PATTERNS, DEFAULT_NUM_SHAFTS, MAX_NUM_SHAFTS, MOCK_PORT_NAME,
    PATTERN_DB_FILE,
};
use crate::loom::ProtocolKind;

/// Which side decides the weave direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DirectionControl {
    /// The loom's direction events are authoritative; client requests are
    /// forwarded to the loom and take effect when it confirms.
    Loom,
    /// The client's `weave_direction` command is authoritative.
    #[default]
    Client,
}

/// Configuration for the loom server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Serial port path, or `"mock"` for the simulated loom.
    pub serial_port: String,
    /// WebSocket listen address.
    pub listen_addr: String,
    /// Pattern store file.
    pub db_path: PathBuf,
    /// Delete the pattern store before opening it.
    pub reset_db: bool,
    /// Number of shafts on the loom (multiple of 8).
    pub num_shafts: u32,
    /// Loom wire protocol.
    pub protocol: ProtocolKind,
    /// Which side decides the weave direction.
    pub direction_control: DirectionControl,
    /// Maximum stored patterns; 0 means unlimited.
    pub max_patterns: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: MOCK_PORT_NAME.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            db_path: Self::default_db_path(),
            reset_db: false,
            num_shafts: DEFAULT_NUM_SHAFTS,
            protocol: ProtocolKind::default(),
            direction_control: DirectionControl::default(),
            max_patterns: DEFAULT_MAX_PATTERNS,
        }
    }
}

impl Config {
    /// Default pattern store path under the platform data directory.
    pub fn default_db_path() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME).join(PATTERN_DB_FILE))
            .unwrap_or_else(|| {
                log::warn!("Could not determine data directory; using working directory");
                PathBuf::from(PATTERN_DB_FILE)
            })
    }

    /// Apply `LOOM_SERVER_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("LOOM_SERVER_SERIAL_PORT") {
            self.serial_port = port;
        }
        if let Some(listen) = lookup("LOOM_SERVER_LISTEN") {
            self.listen_addr = listen;
        }
        if let Some(db_path) = lookup("LOOM_SERVER_DB_PATH") {
            self.db_path = PathBuf::from(db_path);
        }
        if let Some(num_shafts) = lookup("LOOM_SERVER_NUM_SHAFTS") {
            match num_shafts.parse() {
                Ok(n) => self.num_shafts = n,
                Err(e) => log::warn!("Ignoring LOOM_SERVER_NUM_SHAFTS={num_shafts:?}: {e}"),
            }
        }
        if let Some(max_patterns) = lookup("LOOM_SERVER_MAX_PATTERNS") {
            match max_patterns.parse() {
                Ok(n) => self.max_patterns = n,
                Err(e) => log::warn!("Ignoring LOOM_SERVER_MAX_PATTERNS={max_patterns:?}: {e}"),
            }
        }
        if let Some(protocol) = lookup("LOOM_SERVER_PROTOCOL") {
            match <ProtocolKind as clap::ValueEnum>::from_str(&protocol, true) {
                Ok(kind) => self.protocol = kind,
                Err(e) => log::warn!("Ignoring LOOM_SERVER_PROTOCOL={protocol:?}: {e}"),
            }
        }
        if let Some(control) = lookup("LOOM_SERVER_DIRECTION_CONTROL") {
            match <DirectionControl as clap::ValueEnum>::from_str(&control, true) {
                Ok(mode) => self.direction_control = mode,
                Err(e) => log::warn!("Ignoring LOOM_SERVER_DIRECTION_CONTROL={control:?}: {e}"),
            }
        }
    }

    /// Check values that cannot be enforced by types.
    pub fn validate(&self) -> Result<()> {
        if self.num_shafts == 0 || self.num_shafts % 8 != 0 || self.num_shafts > MAX_NUM_SHAFTS {
            bail!(
                "num_shafts={} must be a positive multiple of 8 no larger than {}",
                self.num_shafts,
                MAX_NUM_SHAFTS
            );
        }
        if self.serial_port.is_empty() {
            bail!("serial port must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial_port, "mock");
        assert_eq!(config.num_shafts, 32);
        assert_eq!(config.max_patterns, 25);
        assert_eq!(config.protocol, ProtocolKind::Binary);
        assert_eq!(config.direction_control, DirectionControl::Client);
        assert!(config.db_path.ends_with("loom-server/patterns.json") || config.db_path == PathBuf::from("patterns.json"));
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOOM_SERVER_SERIAL_PORT", "/dev/ttyUSB1"),
            ("LOOM_SERVER_NUM_SHAFTS", "16"),
            ("LOOM_SERVER_PROTOCOL", "ASCII"),
            ("LOOM_SERVER_DIRECTION_CONTROL", "loom"),
            ("LOOM_SERVER_MAX_PATTERNS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.serial_port, "/dev/ttyUSB1");
        assert_eq!(config.num_shafts, 16);
        assert_eq!(config.protocol, ProtocolKind::Ascii);
        assert_eq!(config.direction_control, DirectionControl::Loom);
        assert_eq!(config.max_patterns, 25);
    }

    #[test]
    fn test_validate_num_shafts() {
        let mut config = Config::default();
        for bad in [0, 12, 72] {
            config.num_shafts = bad;
            assert!(config.validate().is_err(), "{bad} accepted");
        }
        for good in [8, 24, 64] {
            config.num_shafts = good;
            assert!(config.validate().is_ok(), "{good} rejected");
        }
    }
}
