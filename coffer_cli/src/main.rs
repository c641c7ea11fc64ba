use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;

mod cmd;
mod net;

#[derive(Parser)]
#[command(name = "coffer-cli", version, about = "Coffer backup client/server CLI", long_about = None)]
struct Cli {
    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the backup server from a `ServerConfig` TOML file.
    Serve {
        /// Path to the server config file. Defaults to the platform config dir.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generates a fresh key-material file for a client.
    Keygen {
        /// Destination path for the key-material file.
        path: PathBuf,
        /// Omit the high-strength AES file-block key (legacy-compatible file).
        #[arg(long)]
        legacy: bool,
    },
    /// Creates or edits a config file.
    Config {
        #[command(subcommand)]
        cmd: cmd::config::CmdConfig,
    },
    /// Runs `CheckAndFix` over a standalone directory-object file.
    Fsck {
        /// Path to the raw directory-object bytes.
        dir_file: PathBuf,
        /// Key-material file used to parse/rewrite the directory.
        #[arg(long)]
        key_material: PathBuf,
    },
    /// Uploads one local file into a remote directory.
    Push {
        /// `host:port` of the server.
        #[arg(long)]
        addr: String,
        /// Remote container directory's object-id.
        #[arg(long)]
        dir_id: u64,
        /// Local file to upload.
        file: PathBuf,
        /// Key-material file.
        #[arg(long)]
        key_material: PathBuf,
        /// Local remote-index cache directory (for diffing against the
        /// last known object-id of this path).
        #[arg(long)]
        cache_dir: PathBuf,
    },
    /// Restores a remote directory subtree onto local disk.
    Restore {
        /// `host:port` of the server.
        #[arg(long)]
        addr: String,
        /// Remote directory's object-id to restore (defaults to the
        /// account root).
        #[arg(long, default_value_t = 1)]
        dir_id: u64,
        /// Local destination directory (must not already exist, unless resuming).
        target: PathBuf,
        /// Key-material file.
        #[arg(long)]
        key_material: PathBuf,
        /// Resume a previously interrupted restore into the same target.
        #[arg(long)]
        resume: bool,
        /// Include entries flagged `Deleted`.
        #[arg(long)]
        include_deleted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.verbosity).init();

    let dirs = ProjectDirs::from("org", "coffer", "coffer")
        .context("failed to determine config directory path")?;

    match cli.cmd {
        Commands::Serve { config } => {
            let path = config.unwrap_or_else(|| dirs.config_dir().join("server.toml"));
            cmd::serve::run(&path).await
        }
        Commands::Keygen { path, legacy } => cmd::keygen::run(&path, legacy),
        Commands::Config { cmd } => cmd.run(&dirs),
        Commands::Fsck { dir_file, key_material } => cmd::fsck::run(&dir_file, &key_material),
        Commands::Push { addr, dir_id, file, key_material, cache_dir } => {
            cmd::push::run(&addr, dir_id, &file, &key_material, &cache_dir).await
        }
        Commands::Restore { addr, dir_id, target, key_material, resume, include_deleted } => {
            cmd::restore::run(&addr, dir_id, &target, &key_material, resume, include_deleted).await
        }
    }
}
