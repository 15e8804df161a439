use serde::Deserialize;
use std::{fs, path::Path};
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub node: Node,
    pub net: Net,
    #[serde(default)]
    pub peers: Peers,
    #[serde(default)]
    pub ledger: LedgerCfg,
    pub storage: Storage,
    #[serde(default)]
    pub crypto: Crypto,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Node {
    #[serde(default = "default_username")]
    pub username: String,
    /// Fixed peer id; when absent one is generated and kept in the database.
    #[serde(default)]
    pub peer_id: Option<String>,
}

impl Default for Node {
    fn default() -> Self {
        Self { username: default_username(), peer_id: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Net {
    #[serde(default = "default_bind_host")]
    pub bind: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub seeds: Vec<String>,             // host:port
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Peers {
    #[serde(default = "default_discovery_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_health_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

impl Default for Peers {
    fn default() -> Self {
        Self {
            discovery_interval_secs: default_discovery_secs(),
            health_interval_secs: default_health_secs(),
            staleness_secs: default_staleness_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerCfg {
    #[serde(default = "default_true")]
    pub apply_remote_balances: bool,
}

impl Default for LedgerCfg {
    fn default() -> Self {
        Self { apply_remote_balances: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Crypto {
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// Network key given out-of-band; overrides `key_file`.
    #[serde(default)]
    pub shared_key_hex: Option<String>,
}

impl Default for Crypto {
    fn default() -> Self {
        Self { key_file: default_key_file(), shared_key_hex: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self { enabled: false, bind: default_metrics_bind() }
    }
}

fn default_username() -> String { "anonymous".into() }
fn default_bind_host() -> String { "0.0.0.0".into() }
fn default_listen_port() -> u16 { 8888 }
fn default_timeout_ms() -> u64 { 5_000 }
fn default_discovery_secs() -> u64 { 30 }
fn default_health_secs() -> u64 { 15 }
fn default_staleness_secs() -> u64 { 60 }
fn default_true() -> bool { true }
fn default_key_file() -> String { "network.key".into() }
fn default_metrics_bind() -> String { "0.0.0.0:9100".into() }

/// Load the node configuration from a TOML file.
///
/// # Errors
/// Fails with the file path in context when the file is unreadable or
/// not valid TOML for `Config`.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("🗂️  couldn’t read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    toml::from_str(text)
        .with_context(|| "📝  invalid TOML in config file".to_string())
}
