//! Client configuration: where the key-material file
//! lives, which server this client talks to, and the tunables `coffer_client`
//! exposes to callers (diffing-time budget, remote-index cache freshness,
//! block-size policy). Mirrors `coffer_server::config::ServerConfig`'s
//! shape — a `serde`/`toml` struct with `#[serde(default = ...)]` fields —
//! the way `s5_cli`/`s5_node` keep client and node config as siblings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path to the key-material file partitioned per `coffer_core::crypto`.
    pub key_material_file: PathBuf,

    /// `host:port` of the server this client backs up to / restores from.
    /// A placeholder string until the auth handshake is designed;
    /// `coffer_cli` takes an explicit `--addr` override today.
    #[serde(default)]
    pub server_addr: Option<String>,

    /// Directory holding the remote-index cache's sidecar files.
    pub cache_dir: PathBuf,

    #[serde(default = "default_diffing_time_budget_secs")]
    pub diffing_time_budget_secs: u64,

    #[serde(default = "default_remote_index_ttl_secs")]
    pub remote_index_ttl_secs: u64,

    /// Block-size policy parameters: adaptive,
    /// `clamp(file_len / divisor, min_block_size, max_block_size)`.
    #[serde(default = "default_block_size_divisor")]
    pub block_size_divisor: u64,
    #[serde(default = "default_min_block_size")]
    pub min_block_size: u32,
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u32,
}

fn default_diffing_time_budget_secs() -> u64 {
    180
}

fn default_remote_index_ttl_secs() -> u64 {
    24 * 3600
}

fn default_block_size_divisor() -> u64 {
    500
}

fn default_min_block_size() -> u32 {
    2 * 1024
}

fn default_max_block_size() -> u32 {
    64 * 1024
}

impl ClientConfig {
    pub fn diffing_time_budget(&self) -> Duration {
        Duration::from_secs(self.diffing_time_budget_secs)
    }

    pub fn remote_index_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_index_ttl_secs)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
