//! `coffer-cli restore`: walks a remote directory subtree back onto local
//! disk via `coffer_client::restore::restore_tree`, using
//! `crate::net::TcpRemoteSource` as the live connection to the server.

use std::path::Path;

use anyhow::{bail, Context, Result};
use coffer_client::{restore_tree, RestoreOptions};
use coffer_core::crypto::CryptoContext;
use coffer_core::error::RestoreStatus;
use coffer_core::ObjectId;

use crate::net::{ServerConnection, TcpRemoteSource};

pub async fn run(
    addr: &str,
    dir_id: u64,
    target: &Path,
    key_material: &Path,
    resume: bool,
    include_deleted: bool,
) -> Result<()> {
    let crypto = CryptoContext::load(key_material).context("loading key material")?;
    let conn = ServerConnection::connect(addr).await?;
    let source = TcpRemoteSource { conn: &conn, crypto: &crypto, include_deleted, include_old_versions: false };

    let options = RestoreOptions { resume, include_deleted, include_old_versions: false };

    let status = restore_tree(&source, &crypto, ObjectId::from(dir_id), target, options)
        .await
        .context("restoring directory tree")?;

    match status {
        RestoreStatus::Complete => {
            println!("restored directory {dir_id} into {}", target.display());
            Ok(())
        }
        RestoreStatus::ResumePossible => {
            bail!(
                "an interrupted restore journal exists at {}; re-run with --resume to continue it",
                target.display()
            )
        }
        RestoreStatus::TargetExists => {
            bail!("restore target {} already exists", target.display())
        }
        RestoreStatus::TargetPathNotFound => {
            bail!("parent directory of restore target {} does not exist", target.display())
        }
    }
}
