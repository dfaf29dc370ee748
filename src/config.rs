//! Configuration management for embercore

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Version string announced during the handshake.
    #[serde(default = "default_version")]
    pub version: String,
    /// Peer versions this node accepts.
    #[serde(default = "default_version_allow")]
    pub version_allow: Vec<String>,
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    #[serde(default)]
    pub regnet: bool,
    /// Number of active outgoing connections to maintain.
    #[serde(default = "default_out_limit")]
    pub out_limit: usize,
    /// Seconds the dial manager sleeps between re-scans.
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    /// Per-operation stream timeout, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Configured peers to dial, as "host:port".
    #[serde(default)]
    pub peers: Vec<String>,
    /// Whether statusjson may reveal the node address.
    #[serde(default = "default_reveal_address")]
    pub reveal_address: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            version: default_version(),
            version_allow: default_version_allow(),
            testnet: default_testnet(),
            regnet: false,
            out_limit: default_out_limit(),
            pause_secs: default_pause_secs(),
            timeout_secs: default_timeout_secs(),
            peers: Vec::new(),
            reveal_address: default_reveal_address(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    2829
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_version() -> String {
    "testnet".to_string()
}

fn default_version_allow() -> Vec<String> {
    vec!["testnet".to_string()]
}

fn default_testnet() -> bool {
    true
}

fn default_out_limit() -> usize {
    10
}

fn default_pause_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    45
}

fn default_reveal_address() -> bool {
    true
}

fn default_db_path() -> String {
    "./data/ledger.db".to_string()
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file is absent.
pub fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)?;
    let config: Config =
        toml::from_str(&config_str).map_err(|e| CoreError::Malformed(format!("{path}: {e}")))?;

    if config.network.version_allow.is_empty() {
        return Err(CoreError::Malformed(
            "network.version_allow must list at least one accepted version".to_string(),
        ));
    }

    Ok(config)
}
