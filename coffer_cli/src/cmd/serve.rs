//! `coffer-cli serve`: loads a [`coffer_server::config::ServerConfig`] and
//! runs the server until `ctrl_c`, mirroring `s5_cli`'s `Commands::Start`
//! arm (`toml::from_str` the config, hand it to the node/server crate).

use std::path::Path;

use anyhow::{Context, Result};
use coffer_server::config::ServerConfig;
use coffer_server::CofferServer;

pub async fn run(config_path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading server config {}", config_path.display()))?;
    let config = ServerConfig::parse(&text).context("parsing server config")?;
    let server = CofferServer::open(config).context("opening configured accounts")?;
    server.run().await
}
