//! `coffer-cli push`: uploads one local file into a remote directory,
//! deciding fresh-vs-diff with `coffer_client::diffstate::plan_upload`
//! against whatever the local remote-index cache remembers for this
//! path, then sending the encoded bytes over `PutFile`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use coffer_client::{plan_upload, CachedRemoteIndex, RemoteIndexCache, UploadStrategy};
use coffer_core::crypto::CryptoContext;
use coffer_core::filename::StoreFilename;
use coffer_core::attributes::StoreAttributes;
use coffer_fileformat::decode::parse as parse_file;

use crate::net::ServerConnection;

pub async fn run(
    addr: &str,
    dir_id: u64,
    file: &Path,
    key_material: &Path,
    cache_dir: &Path,
) -> Result<()> {
    let crypto = CryptoContext::load(key_material).context("loading key material")?;
    let cleartext = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let absolute = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());

    let name = file
        .file_name()
        .context("file path has no final component")?
        .to_string_lossy()
        .into_owned();
    let filename = StoreFilename::encrypted(name);
    let attrs = StoreAttributes::empty();
    let modification_time = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

    let cache = RemoteIndexCache::new(cache_dir);
    let cached = cache.load(&absolute).context("reading local remote-index cache")?;

    let plan = plan_upload(
        &cleartext,
        coffer_core::ObjectId::from(dir_id),
        &filename,
        &attrs,
        modification_time,
        &crypto,
        cached.as_ref(),
        None,
    )
    .context("planning upload")?;

    let parsed = parse_file(&plan.bytes, &crypto)?;
    let present_blocks = parsed.entries.iter().filter(|e| e.is_present()).count() as u64;
    let entries = parsed.entries.clone();

    let conn = ServerConnection::connect(addr).await?;
    let object_id = conn.put_file(dir_id, plan.bytes.clone(), present_blocks, attrs.hash()).await?;

    cache
        .store(
            &absolute,
            &CachedRemoteIndex { object_id: coffer_core::ObjectId::from(object_id), cached_at: modification_time, entries },
        )
        .context("updating local remote-index cache")?;

    match plan.strategy {
        UploadStrategy::Fresh => {
            println!("uploaded {} as object {object_id} (fresh, {present_blocks} blocks)", file.display());
        }
        UploadStrategy::Diff { prior_object_id } => {
            println!(
                "uploaded {} as object {object_id} (diff against {}, {present_blocks} fresh blocks, completely_different={})",
                file.display(),
                prior_object_id,
                plan.is_completely_different
            );
        }
    }
    Ok(())
}
