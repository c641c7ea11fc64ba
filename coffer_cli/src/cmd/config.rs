//! `coffer-cli config`: creates or edits the server/client TOML config
//! files in place, grounded in `s5_cli::CmdConfig::Init`'s
//! `toml_edit::DocumentMut` read-modify-write-to-temp-then-rename dance.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use directories::ProjectDirs;
use toml_edit::{DocumentMut, Item, Table};

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates `server.toml` with one account pointing at `account_root`,
    /// if it doesn't already exist.
    InitServer {
        #[arg(long)]
        listen_addr: String,
        #[arg(long)]
        account_id: u64,
        #[arg(long)]
        account_root: std::path::PathBuf,
    },
    /// Creates `client.toml` pointing at a key-material file and cache dir.
    InitClient {
        #[arg(long)]
        key_material_file: std::path::PathBuf,
        #[arg(long)]
        cache_dir: std::path::PathBuf,
    },
}

impl CmdConfig {
    pub fn run(self, dirs: &ProjectDirs) -> Result<()> {
        match self {
            CmdConfig::InitServer { listen_addr, account_id, account_root } => {
                let path = dirs.config_dir().join("server.toml");
                let mut doc = load_or_empty(&path)?;

                doc.entry("listen_addr").or_insert(listen_addr.into());
                let accounts = doc
                    .entry("accounts")
                    .or_insert(Item::Table(Table::new()))
                    .as_table_mut()
                    .context("'accounts' is not a table")?;
                accounts.set_implicit(true);
                let mut account_table = Table::new();
                account_table.insert("root", account_root.to_string_lossy().into_owned().into());
                accounts.insert(&account_id.to_string(), Item::Table(account_table));

                write_atomically(&path, &doc)?;
                tracing::info!(path = %path.display(), "wrote server config");
                Ok(())
            }
            CmdConfig::InitClient { key_material_file, cache_dir } => {
                let path = dirs.config_dir().join("client.toml");
                let mut doc = load_or_empty(&path)?;
                doc.entry("key_material_file")
                    .or_insert(key_material_file.to_string_lossy().into_owned().into());
                doc.entry("cache_dir").or_insert(cache_dir.to_string_lossy().into_owned().into());

                write_atomically(&path, &doc)?;
                tracing::info!(path = %path.display(), "wrote client config");
                Ok(())
            }
        }
    }
}

fn load_or_empty(path: &Path) -> Result<DocumentMut> {
    let text = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        String::new()
    };
    text.parse::<DocumentMut>().with_context(|| format!("parsing {} as TOML", path.display()))
}

fn write_atomically(path: &Path, doc: &DocumentMut) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut tmp = fs::OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
    tmp.write_all(doc.to_string().as_bytes())?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
