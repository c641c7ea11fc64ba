//! Server configuration: one TOML document describing
//! where each account's store lives and the quota/housekeeping defaults
//! applied to accounts that don't override them. Grounded in
//! `s5_node::config::S5NodeConfig`'s map-of-named-sections shape, narrowed
//! from s5's many store backends down to the one local record store this
//! server speaks.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` the server accepts connections on.
    pub listen_addr: String,

    #[serde(default = "default_soft_limit")]
    pub default_soft_limit_blocks: u64,

    #[serde(default = "default_hard_limit")]
    pub default_hard_limit_blocks: u64,

    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,

    #[serde(default = "default_writer_slot_timeout_secs")]
    pub writer_slot_timeout_secs: u64,

    #[serde(default = "default_old_version_retention_secs")]
    pub old_version_retention_secs: u64,

    #[serde(default = "default_deleted_retention_secs")]
    pub deleted_retention_secs: u64,

    /// Accounts keyed by their account-id as a decimal string (TOML table
    /// keys must be strings).
    pub accounts: BTreeMap<String, AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Directory holding `account_info.bin`, the key-material file, and
    /// the record-store's own on-disk files.
    pub root: PathBuf,

    #[serde(default)]
    pub soft_limit_blocks: Option<u64>,

    #[serde(default)]
    pub hard_limit_blocks: Option<u64>,
}

fn default_soft_limit() -> u64 {
    1_000_000
}

fn default_hard_limit() -> u64 {
    1_200_000
}

fn default_housekeeping_interval_secs() -> u64 {
    3600
}

fn default_writer_slot_timeout_secs() -> u64 {
    30
}

fn default_old_version_retention_secs() -> u64 {
    30 * 24 * 3600
}

fn default_deleted_retention_secs() -> u64 {
    7 * 24 * 3600
}

impl ServerConfig {
    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }

    pub fn writer_slot_timeout(&self) -> Duration {
        Duration::from_secs(self.writer_slot_timeout_secs)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
