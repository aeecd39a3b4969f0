//! Node configuration.
//!
//! Settings come from an optional JSON file (`--config <path>`); command
//! line flags override individual fields. Protocol constants live in
//! [`crate::params`] and are not configurable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Keypair;
use crate::params::BROADCAST_ECHOES;

/// Command line usage
pub const USAGE: &str = "\
stakechain-node

USAGE:
    stakechain-node [OPTIONS]

OPTIONS:
    --config <PATH>        JSON configuration file
    --data-dir <PATH>      Directory holding the node database
    --listen <ADDR>        Listen address (default: 127.0.0.1:12222)
    --peer <ADDR>          Peer to dial, may be repeated
    --mine                 Produce blocks
    --key-seed <HEX>       32-byte hex seed of the node key
    --genesis <PATH>       Genesis block (JSON)
    -h, --help             Print help";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file cannot be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`NodeConfig`]
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A flag needs a value and got none
    #[error("missing value for {0}")]
    MissingValue(String),

    /// Unrecognized flag
    #[error("unknown option {0}")]
    UnknownFlag(String),

    /// The key seed is not 32 hex-encoded bytes
    #[error("invalid key seed: {0}")]
    InvalidKeySeed(String),
}

/// Node settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the sled database
    pub data_dir: PathBuf,
    /// Address to accept connections on
    pub listen_addr: String,
    /// Peers dialed at startup
    pub peers: Vec<String>,
    /// Whether to produce blocks
    pub mine: bool,
    /// Hex seed of the node key; a fresh key is generated when absent
    pub key_seed_hex: Option<String>,
    /// Genesis block file, needed on first start
    pub genesis_path: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Interval between node ticks
    pub tick_interval_ms: u64,
    /// Hop budget of locally originated broadcasts
    pub broadcast_echoes: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stakechain"),
            listen_addr: "127.0.0.1:12222".to_string(),
            peers: Vec::new(),
            mine: false,
            key_seed_hex: None,
            genesis_path: None,
            log_filter: "info".to_string(),
            tick_interval_ms: 1_000,
            broadcast_echoes: BROADCAST_ECHOES,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; absent fields take their defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build from command line arguments (without the program name).
    /// Returns `None` when help was requested.
    ///
    /// # Errors
    /// Returns error on an unknown flag, a missing value or an unreadable
    /// configuration file
    pub fn from_args<I>(args: I) -> Result<Option<Self>, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = Vec::new();
        let mut file = None;
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "-h" | "--help" => return Ok(None),
                "--mine" => overrides.push((flag, String::new())),
                "--config" => file = Some(PathBuf::from(value_of(&flag, args.next())?)),
                "--data-dir" | "--listen" | "--peer" | "--key-seed" | "--genesis" => {
                    let value = value_of(&flag, args.next())?;
                    overrides.push((flag, value));
                }
                _ => return Err(ConfigError::UnknownFlag(flag)),
            }
        }

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        for (flag, value) in overrides {
            match flag.as_str() {
                "--mine" => config.mine = true,
                "--data-dir" => config.data_dir = PathBuf::from(value),
                "--listen" => config.listen_addr = value,
                "--peer" => config.peers.push(value),
                "--key-seed" => config.key_seed_hex = Some(value),
                "--genesis" => config.genesis_path = Some(PathBuf::from(value)),
                _ => return Err(ConfigError::UnknownFlag(flag)),
            }
        }
        Ok(Some(config))
    }

    /// Node key from the configured seed, `None` when no seed is set
    ///
    /// # Errors
    /// Returns error if the seed is not 32 hex-encoded bytes
    pub fn keypair(&self) -> Result<Option<Keypair>, ConfigError> {
        let Some(seed_hex) = &self.key_seed_hex else {
            return Ok(None);
        };
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| ConfigError::InvalidKeySeed(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| ConfigError::InvalidKeySeed(format!("{} bytes", bytes.len())))?;
        Ok(Some(Keypair::from_seed(seed)))
    }

    /// Tick interval as a duration, at least one millisecond
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

fn value_of(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:12222");
        assert!(config.data_dir.ends_with("stakechain"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.broadcast_echoes, BROADCAST_ECHOES);
        assert!(!config.mine);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"mine": true, "peers": ["10.0.0.1:12222"]}"#).unwrap();
        assert!(config.mine);
        assert_eq!(config.peers, vec!["10.0.0.1:12222".to_string()]);
        assert_eq!(config.tick_interval_ms, 1_000);
    }

    #[test]
    fn test_flags_override_file() {
        let path = std::env::temp_dir().join(format!("stakechain-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"listen_addr": "0.0.0.0:1", "peers": ["a:1"]}"#).unwrap();

        let config = NodeConfig::from_args(args(&[
            "--config",
            path.to_str().unwrap(),
            "--listen",
            "0.0.0.0:2",
            "--peer",
            "b:2",
            "--mine",
        ]))
        .unwrap()
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:2");
        assert_eq!(config.peers, vec!["a:1".to_string(), "b:2".to_string()]);
        assert!(config.mine);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(matches!(
            NodeConfig::from_args(args(&["--bogus"])),
            Err(ConfigError::UnknownFlag(_))
        ));
        assert!(matches!(
            NodeConfig::from_args(args(&["--listen"])),
            Err(ConfigError::MissingValue(_))
        ));
        assert!(NodeConfig::from_args(args(&["--help"])).unwrap().is_none());
    }

    #[test]
    fn test_key_seed() {
        let mut config = NodeConfig::default();
        assert!(config.keypair().unwrap().is_none());

        config.key_seed_hex = Some("07".repeat(32));
        let keypair = config.keypair().unwrap().unwrap();
        assert_eq!(keypair.public_key(), Keypair::from_seed([7; 32]).public_key());

        config.key_seed_hex = Some("07".repeat(31));
        assert!(matches!(config.keypair(), Err(ConfigError::InvalidKeySeed(_))));
    }
}
