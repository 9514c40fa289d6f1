//! Configuration management
//!
//! Handles engine configuration loading and validation: which network magic
//! to speak, payload limits, and the codec's strictness toggles.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::network::framing::{
    MAGIC_MAINNET, MAGIC_REGTEST, MAGIC_TESTNET, MAX_PAYLOAD_LENGTH,
};

/// Network selector determining the frame magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkKind {
    pub fn magic(&self) -> [u8; 4] {
        match self {
            NetworkKind::Mainnet => MAGIC_MAINNET,
            NetworkKind::Testnet => MAGIC_TESTNET,
            NetworkKind::Regtest => MAGIC_REGTEST,
        }
    }
}

/// Protocol engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which network's magic to frame messages with.
    #[serde(default = "default_network")]
    pub network: NetworkKind,

    /// Upper bound on message payload length, inbound and outbound.
    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: usize,

    /// Tolerate trailing bytes after decoded message bodies.
    #[serde(default)]
    pub ignore_trailing_payload: bool,

    /// Enable the codec's repack self-check on every unpack.
    #[serde(default)]
    pub debug_checks: bool,

    /// Log filter used when RUST_LOG is not set (e.g. "info",
    /// "poolwire=debug").
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_network() -> NetworkKind {
    // Regtest by default for safe development/testing
    NetworkKind::Regtest
}

fn default_max_payload_length() -> usize {
    MAX_PAYLOAD_LENGTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            max_payload_length: default_max_payload_length(),
            ignore_trailing_payload: false,
            debug_checks: false,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn magic(&self) -> [u8; 4] {
        self.network.magic()
    }

    /// Apply the process-wide codec toggles this config carries.
    pub fn apply_debug_checks(&self) {
        crate::codec::set_debug_checks(self.debug_checks);
    }
}
