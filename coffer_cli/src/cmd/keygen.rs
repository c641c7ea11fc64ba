//! `coffer-cli keygen`: generates a fresh key-material file, partitioned by
//! the fixed offsets `coffer_core::crypto::CryptoContext` expects. Grounded
//! in `s5_cli`'s `CmdConfig::Init` secret-key generation (`rand::rng().fill_bytes`
//! into a fixed-size buffer, written once, never regenerated in place).

use std::path::Path;

use anyhow::{bail, Context, Result};
use coffer_core::crypto::{KEY_MATERIAL_LEN, KEY_MATERIAL_LEN_WITH_AES};
use rand::RngCore;

pub fn run(path: &Path, legacy: bool) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing key-material file at {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let len = if legacy { KEY_MATERIAL_LEN } else { KEY_MATERIAL_LEN_WITH_AES };
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    std::fs::write(path, &buf).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = len, "generated key-material file");
    Ok(())
}
