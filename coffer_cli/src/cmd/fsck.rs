//! `coffer-cli fsck`: the offline half of directory consistency checking
//! (`CheckAndFix`), run over a standalone directory-object file rather
//! than a live server.

use std::path::Path;

use anyhow::{Context, Result};
use coffer_core::crypto::CryptoContext;
use coffer_dirformat::{check_and_fix, DirectoryObject, EntryFlags};

pub fn run(dir_file: &Path, key_material: &Path) -> Result<()> {
    let crypto = CryptoContext::load(key_material).context("loading key material")?;
    let bytes = std::fs::read(dir_file).with_context(|| format!("reading {}", dir_file.display()))?;
    let mut dir = DirectoryObject::parse(&bytes, &crypto).context("parsing directory object")?;

    let modified = check_and_fix(&mut dir);
    if !modified {
        println!("{}: no inconsistencies found ({} entries)", dir_file.display(), dir.entries().len());
        return Ok(());
    }

    let rewritten = dir.serialize(&crypto, EntryFlags::empty(), EntryFlags::empty(), true)?;
    std::fs::write(dir_file, &rewritten).with_context(|| format!("writing {}", dir_file.display()))?;
    println!(
        "{}: repaired, {} entries remain (duplicate ids dropped, dangling dependency links cleared)",
        dir_file.display(),
        dir.entries().len()
    );
    Ok(())
}
