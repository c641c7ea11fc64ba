//! Chain-collapse: pruning one directory entry out of a diff chain while
//! keeping every remaining member of the chain retrievable. Grounded
//! directly in `coffer_fileformat::reverse` and `coffer_fileformat::combine`,
//! which this module is the only caller of outside their own unit tests.
//!
//! Three shapes, depending on where the pruned entry `E` sits in the
//! chain:
//!
//! - **Base removal** (`E.depends_older` is none, `E.depends_newer = N`
//!   exists): `E` is the chain's complete root and `N` is a diff against
//!   it. Reverse-diffing folds `E` into a diff against `N`'s full content,
//!   and `N` is re-stored as the new complete root.
//! - **Middle removal** (`E.depends_older = P` and `E.depends_newer = N`
//!   both exist): `E` is a diff sandwiched between an older base `P` and a
//!   newer diff `N`. `combine_diff_on_diff` folds `E`'s delta into `N`, so
//!   `N` becomes a direct diff against `P` and `E` drops out entirely.
//! - **Leaf removal** (`E.depends_newer` is none): nothing depends on `E`;
//!   its bytes are simply discarded and, if `E.depends_older = P` exists,
//!   `P`'s `depends_newer` link is cleared.
//!
//! Every retargeted child additionally gets its stored object bytes
//! rewritten via [`coffer_fileformat::retarget::retarget_other_file_id`]
//! to keep the file body's `other_file_id` trailer field in sync with the
//! directory metadata's `depends_newer` consistency invariant.

use bytes::Bytes;
use coffer_account::AccountInfo;
use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;
use coffer_dirformat::{DirectoryObject, EntryFlags};
use coffer_fileformat::combine::{combine_diff_on_diff, combine_file};
use coffer_fileformat::reverse::reverse_diff;
use coffer_fileformat::retarget::retarget_other_file_id;
use coffer_store::RecordStore;

/// Blocks freed and entries rewritten by one collapse step.
#[derive(Debug, Default)]
pub struct CollapseReport {
    pub blocks_freed: i64,
    pub entries_rewritten: u64,
}

/// Collapses the diff chain around `target_id`, which must name an entry
/// already flagged `RemoveASAP`. `dir`'s entry for `target_id` is removed
/// and replaced by whatever new entries the collapse produces; `store` is
/// mutated to match.
pub async fn collapse_entry(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    crypto: &CryptoContext,
    target_id: ObjectId,
) -> Result<CollapseReport> {
    let entry = dir
        .find_entry_by_id(target_id)
        .ok_or(BackupError::CouldNotFindEntryInDirectory(target_id.as_u64()))?;
    let flags = entry.flags;
    let depends_older = entry.depends_older;
    let depends_newer = entry.depends_newer;

    match (depends_older.is_none(), depends_newer.is_none()) {
        (true, false) => collapse_base(dir, store, account, crypto, target_id, depends_newer, flags).await,
        (false, false) => {
            collapse_middle(dir, store, account, crypto, target_id, depends_older, depends_newer).await
        }
        (false, true) => collapse_leaf_with_base(dir, store, account, target_id, depends_older).await,
        (true, true) => collapse_standalone(dir, store, account, target_id).await,
    }
}

/// `E` is the chain's complete base; `N = E.depends_newer` is a diff
/// against it.
async fn collapse_base(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    crypto: &CryptoContext,
    e_id: ObjectId,
    n_id: ObjectId,
    e_flags: EntryFlags,
) -> Result<CollapseReport> {
    let e_bytes = fetch(store, e_id).await?;
    let n_bytes = fetch(store, n_id).await?;
    let n_entry_flags = dir
        .find_entry_by_id(n_id)
        .ok_or(BackupError::CouldNotFindEntryInDirectory(n_id.as_u64()))?
        .flags;
    let n_grandchild = dir.find_entry_by_id(n_id).and_then(|e| {
        if e.depends_newer.is_none() {
            None
        } else {
            Some(e.depends_newer)
        }
    });

    let new_n_id = account.allocate_object_id();
    let new_n_bytes = combine_file(&n_bytes, &e_bytes, crypto)?;

    let reversed = reverse_diff(&n_bytes, &e_bytes, new_n_id, crypto)?;
    let new_e_id = account.allocate_object_id();

    let e_blocks = dir.find_entry_by_id(e_id).map(|e| e.size_in_blocks).unwrap_or(0);
    let n_blocks = dir.find_entry_by_id(n_id).map(|e| e.size_in_blocks).unwrap_or(0);

    store.put(new_n_id, Bytes::from(new_n_bytes.clone())).await.map_err(store_err)?;
    store.put(new_e_id, Bytes::from(reversed.bytes.clone())).await.map_err(store_err)?;

    let mut rewritten = 0u64;
    if let Some(grandchild_id) = n_grandchild {
        let grandchild_bytes = fetch(store, grandchild_id).await?;
        let retargeted = retarget_other_file_id(&grandchild_bytes, new_n_id, crypto)?;
        store.put(grandchild_id, Bytes::from(retargeted)).await.map_err(store_err)?;
        if let Some(g) = dir.find_entry_by_id_mut(grandchild_id) {
            g.depends_older = new_n_id;
        }
        rewritten += 1;
    }

    let mut e_entry = dir.delete_entry(e_id)?;
    let mut n_entry = dir.delete_entry(n_id)?;
    store.delete(e_id).await.map_err(store_err)?;
    store.delete(n_id).await.map_err(store_err)?;

    e_entry.object_id = new_e_id;
    e_entry.flags = e_flags & !EntryFlags::REMOVE_ASAP;
    e_entry.depends_newer = new_n_id;
    e_entry.depends_older = ObjectId::NONE;
    let new_e_blocks = entry_block_count(&reversed.bytes, crypto)?;
    e_entry.size_in_blocks = new_e_blocks;
    dir.add_entry(e_entry);

    n_entry.object_id = new_n_id;
    n_entry.flags = n_entry_flags;
    n_entry.depends_older = new_e_id;
    n_entry.depends_newer = n_grandchild.unwrap_or(ObjectId::NONE);
    let new_n_blocks = entry_block_count(&new_n_bytes, crypto)?;
    n_entry.size_in_blocks = new_n_blocks;
    dir.add_entry(n_entry);

    let freed = (e_blocks + n_blocks) as i64 - (new_e_blocks + new_n_blocks) as i64;
    account.change_blocks_used(-freed);
    account.change_blocks_in_old_files(-freed);

    Ok(CollapseReport { blocks_freed: freed, entries_rewritten: rewritten + 2 })
}

/// `E` sits between an older base `P` and a newer diff `N`; fold `E`'s
/// delta into `N` so `N` becomes a direct diff against `P`.
async fn collapse_middle(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    crypto: &CryptoContext,
    e_id: ObjectId,
    p_id: ObjectId,
    n_id: ObjectId,
) -> Result<CollapseReport> {
    let e_bytes = fetch(store, e_id).await?;
    let n_bytes = fetch(store, n_id).await?;

    let folded = combine_diff_on_diff(&e_bytes, e_id, &n_bytes, crypto)?;
    let new_n_id = account.allocate_object_id();

    let e_blocks = dir.find_entry_by_id(e_id).map(|e| e.size_in_blocks).unwrap_or(0);
    let n_blocks = dir.find_entry_by_id(n_id).map(|e| e.size_in_blocks).unwrap_or(0);

    store.put(new_n_id, Bytes::from(folded.clone())).await.map_err(store_err)?;

    dir.delete_entry(e_id)?;
    let mut n_entry = dir.delete_entry(n_id)?;
    store.delete(e_id).await.map_err(store_err)?;
    store.delete(n_id).await.map_err(store_err)?;

    n_entry.object_id = new_n_id;
    n_entry.depends_older = p_id;
    let new_n_blocks = entry_block_count(&folded, crypto)?;
    n_entry.size_in_blocks = new_n_blocks;
    dir.add_entry(n_entry);

    if let Some(p_entry) = dir.find_entry_by_id_mut(p_id) {
        p_entry.depends_newer = new_n_id;
    }

    let freed = (e_blocks + n_blocks) as i64 - new_n_blocks as i64;
    account.change_blocks_used(-freed);
    account.change_blocks_in_old_files(-freed);

    Ok(CollapseReport { blocks_freed: freed, entries_rewritten: 1 })
}

/// `E` is a diff against `P` that nothing else depends on; just discard it
/// and clear `P`'s forward link.
async fn collapse_leaf_with_base(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    e_id: ObjectId,
    p_id: ObjectId,
) -> Result<CollapseReport> {
    let e_entry = dir.delete_entry(e_id)?;
    store.delete(e_id).await.map_err(store_err)?;
    if let Some(p_entry) = dir.find_entry_by_id_mut(p_id) {
        if p_entry.depends_newer == e_id {
            p_entry.depends_newer = ObjectId::NONE;
        }
    }
    let freed = e_entry.size_in_blocks as i64;
    account.change_blocks_used(-freed);
    if e_entry.is_deleted() {
        account.change_blocks_in_deleted_files(-freed);
    } else {
        account.change_blocks_in_old_files(-freed);
    }
    Ok(CollapseReport { blocks_freed: freed, entries_rewritten: 0 })
}

/// `E` has no chain links at all; just discard it.
async fn collapse_standalone(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    e_id: ObjectId,
) -> Result<CollapseReport> {
    let e_entry = dir.delete_entry(e_id)?;
    store.delete(e_id).await.map_err(store_err)?;
    let freed = e_entry.size_in_blocks as i64;
    account.change_blocks_used(-freed);
    if e_entry.is_deleted() {
        account.change_blocks_in_deleted_files(-freed);
    } else {
        account.change_blocks_in_old_files(-freed);
    }
    Ok(CollapseReport { blocks_freed: freed, entries_rewritten: 0 })
}

async fn fetch(store: &dyn RecordStore, id: ObjectId) -> Result<Vec<u8>> {
    store
        .get(id)
        .await
        .map_err(store_err)?
        .map(|b| b.to_vec())
        .ok_or(BackupError::CouldNotFindEntryInDirectory(id.as_u64()))
}

fn entry_block_count(object_bytes: &[u8], crypto: &CryptoContext) -> Result<u64> {
    coffer_fileformat::verify::verify_format(object_bytes, None, crypto).map(|v| v.num_blocks)
}

fn store_err(e: anyhow::Error) -> BackupError {
    BackupError::BadBackupStoreFile(e.to_string())
}
