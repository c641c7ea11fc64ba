//! The per-directory housekeeping pass: mark aged `OldVersion`/`Deleted`
//! entries `RemoveASAP`, then collapse every `RemoveASAP` entry out of the
//! directory via [`crate::collapse`].

use coffer_account::AccountInfo;
use coffer_core::crypto::CryptoContext;
use coffer_core::error::Result;
use coffer_core::ObjectId;
use coffer_dirformat::{DirectoryObject, EntryFlags};
use coffer_store::RecordStore;

use crate::collapse::collapse_entry;
use crate::policy::RetentionPolicy;

#[derive(Debug, Default)]
pub struct DirectoryPassReport {
    pub marked_remove_asap: u64,
    pub collapsed: u64,
    pub blocks_freed: i64,
}

/// Runs one housekeeping pass over a single directory's entries. `now` is
/// the current unix timestamp (passed in rather than read from the clock,
/// since this crate avoids direct timekeeping so callers can drive it
/// deterministically in tests).
pub async fn run_directory_pass(
    dir: &mut DirectoryObject,
    store: &dyn RecordStore,
    account: &mut AccountInfo,
    crypto: &CryptoContext,
    policy: &RetentionPolicy,
    now: u64,
) -> Result<DirectoryPassReport> {
    let mut report = DirectoryPassReport::default();

    mark_aged_entries(dir, policy, now, &mut report);

    // Snapshot RemoveASAP ids before mutating: `collapse_entry` rewrites
    // `dir`'s entry list in place, which would otherwise invalidate an
    // in-progress iterator.
    let to_collapse: Vec<ObjectId> = dir
        .iter_filtered(EntryFlags::REMOVE_ASAP, EntryFlags::empty())
        .map(|e| e.object_id)
        .collect();

    for id in to_collapse {
        if dir.find_entry_by_id(id).is_none() {
            // Already folded away as a side effect of collapsing a sibling
            // (e.g. a middle entry removed while collapsing its base).
            continue;
        }
        let collapse_report = collapse_entry(dir, store, account, crypto, id).await?;
        report.collapsed += 1;
        report.blocks_freed += collapse_report.blocks_freed;
    }

    Ok(report)
}

fn mark_aged_entries(
    dir: &mut DirectoryObject,
    policy: &RetentionPolicy,
    now: u64,
    report: &mut DirectoryPassReport,
) {
    let old_version_cutoff = now.saturating_sub(policy.old_version_retention.as_secs());
    let deleted_cutoff = now.saturating_sub(policy.deleted_retention.as_secs());

    let to_mark: Vec<ObjectId> = dir
        .entries()
        .iter()
        .filter(|e| {
            if e.flags.contains(EntryFlags::REMOVE_ASAP) {
                return false;
            }
            (e.is_old_version() && e.modification_time <= old_version_cutoff)
                || (e.is_deleted() && e.modification_time <= deleted_cutoff)
        })
        .map(|e| e.object_id)
        .collect();

    for id in to_mark {
        if let Some(entry) = dir.find_entry_by_id_mut(id) {
            entry.flags |= EntryFlags::REMOVE_ASAP;
            report.marked_remove_asap += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use coffer_core::attributes::StoreAttributes;
    use coffer_core::crypto::CryptoContext;
    use coffer_core::filename::StoreFilename;
    use coffer_dirformat::DirectoryEntry;
    use coffer_store::RecordStore as _;
    use coffer_store_memory::MemoryStore;
    use std::time::Duration;

    fn crypto() -> CryptoContext {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 23 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    fn entry(id: u64, flags: EntryFlags, mtime: u64, blocks: u64) -> DirectoryEntry {
        DirectoryEntry {
            modification_time: mtime,
            object_id: ObjectId::from(id),
            size_in_blocks: blocks,
            attributes_hash: 0,
            flags,
            name: StoreFilename::encrypted(&format!("f{id}.bin")),
            attributes: StoreAttributes::empty(),
            mark: 0,
            min_mark: 0,
            depends_newer: ObjectId::NONE,
            depends_older: ObjectId::NONE,
        }
    }

    /// Builds a three-link chain A <- B <- C: A complete, B a diff against
    /// A, C a diff against B.
    async fn build_chain(crypto: &CryptoContext, store: &MemoryStore) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let container = ObjectId::from(2);
        let filename = StoreFilename::encrypted("report.doc");
        let attrs = StoreAttributes::empty();

        let a_data: Vec<u8> = (0..40_000u32).map(|i| (i % 211) as u8).collect();
        let a_bytes =
            coffer_fileformat::encode::encode_fresh(&a_data, container, &filename, &attrs, 1, crypto)
                .unwrap();
        let a_parsed = coffer_fileformat::decode::parse(&a_bytes, crypto).unwrap();

        let mut b_data = a_data.clone();
        b_data.extend_from_slice(b"first revision tail");
        let b_diff = coffer_fileformat::encode::encode_diff(
            &b_data, container, &filename, &attrs, 2, crypto,
            &a_parsed.entries, ObjectId::from(10), None,
        ).unwrap();
        let b_bytes = b_diff.bytes;
        let b_parsed = coffer_fileformat::decode::parse(&b_bytes, crypto).unwrap();

        let mut c_data = b_data.clone();
        c_data.extend_from_slice(b"second revision tail");
        let c_diff = coffer_fileformat::encode::encode_diff(
            &c_data, container, &filename, &attrs, 3, crypto,
            &b_parsed.entries, ObjectId::from(11), None,
        ).unwrap();
        let c_bytes = c_diff.bytes;

        store.put(ObjectId::from(10), Bytes::from(a_bytes.clone())).await.unwrap();
        store.put(ObjectId::from(11), Bytes::from(b_bytes.clone())).await.unwrap();
        store.put(ObjectId::from(12), Bytes::from(c_bytes.clone())).await.unwrap();

        (a_bytes, b_bytes, c_bytes)
    }

    #[tokio::test]
    async fn scenario_3_housekeeping_collapses_a_chain() {
        let crypto = crypto();
        let store = MemoryStore::new();
        let (a_bytes, b_bytes, _c_bytes) = build_chain(&crypto, &store).await;

        let a_blocks =
            coffer_fileformat::verify::verify_format(&a_bytes, None, &crypto).unwrap().num_blocks;
        let b_blocks =
            coffer_fileformat::verify::verify_format(&b_bytes, Some(a_blocks), &crypto).unwrap().num_blocks;

        let mut dir = DirectoryObject::new(ObjectId::from(2), ObjectId::ROOT);
        let mut a = entry(10, EntryFlags::FILE | EntryFlags::OLD_VERSION, 0, a_blocks);
        a.depends_newer = ObjectId::from(11);
        dir.add_entry(a);

        let mut b = entry(11, EntryFlags::FILE | EntryFlags::OLD_VERSION, 500, b_blocks);
        b.depends_older = ObjectId::from(10);
        b.depends_newer = ObjectId::from(12);
        dir.add_entry(b);

        let mut c = entry(12, EntryFlags::FILE, 1000, 1);
        c.depends_older = ObjectId::from(11);
        dir.add_entry(c);

        let mut account = coffer_account::AccountInfo::new(1, 1_000_000, 2_000_000);
        account.allocate_object_id(); // 2: the directory itself
        for _ in 0..10 {
            account.allocate_object_id();
        }
        let before_blocks_used = a_blocks + b_blocks + 1;
        account.change_blocks_used(before_blocks_used as i64);
        account.change_blocks_in_old_files((a_blocks + b_blocks) as i64);

        // Cutoff lands strictly between A's and B's modification times, so
        // only A (the chain's complete base) has aged past retention.
        let policy = RetentionPolicy::new(Duration::from_secs(9_600), Duration::from_secs(0));
        let report =
            run_directory_pass(&mut dir, &store, &mut account, &crypto, &policy, 10_000).await.unwrap();

        assert_eq!(report.marked_remove_asap, 1, "only A has aged past retention");
        assert_eq!(report.collapsed, 1);
        assert!(report.blocks_freed > 0, "collapsing should shrink total blocks");

        // A and B's old object-ids are gone from both the directory and the store.
        assert!(dir.find_entry_by_id(ObjectId::from(10)).is_none());
        assert!(dir.find_entry_by_id(ObjectId::from(11)).is_none());
        assert!(store.get(ObjectId::from(10)).await.unwrap().is_none());
        assert!(store.get(ObjectId::from(11)).await.unwrap().is_none());

        // C is untouched by object-id, but now borrows from B's replacement.
        let c_entry = dir.find_entry_by_id(ObjectId::from(12)).unwrap();
        let new_b_id = c_entry.depends_older;
        assert_ne!(new_b_id, ObjectId::from(11));

        // The replacement for B is complete; the replacement for A is now a
        // diff expressed against it.
        let new_b_bytes = store.get(new_b_id).await.unwrap().unwrap();
        let new_b_verified = coffer_fileformat::verify::verify_format(&new_b_bytes, None, &crypto).unwrap();
        assert!(new_b_verified.other_file_id.is_none());

        let new_a_entry = dir
            .entries()
            .iter()
            .find(|e| e.is_old_version() && e.depends_newer == new_b_id)
            .expect("A's replacement should point forward at B's replacement");
        let new_a_bytes = store.get(new_a_entry.object_id).await.unwrap().unwrap();
        let new_a_verified = coffer_fileformat::verify::verify_format(
            &new_a_bytes,
            Some(new_b_verified.num_blocks),
            &crypto,
        )
        .unwrap();
        assert_eq!(new_a_verified.other_file_id, new_b_id);

        // Reconstructing through the new chain reproduces A's original content.
        let reconstructed =
            coffer_fileformat::combine::combine_file(&new_a_bytes, &new_b_bytes, &crypto).unwrap();
        let reconstructed_parsed = coffer_fileformat::decode::parse(&reconstructed, &crypto).unwrap();
        let decoded = coffer_fileformat::decode::decode_to_cleartext(&reconstructed_parsed, &crypto, |_| {
            unreachable!("reconstructed object is complete")
        }).unwrap();
        let a_parsed = coffer_fileformat::decode::parse(&a_bytes, &crypto).unwrap();
        let original_a = coffer_fileformat::decode::decode_to_cleartext(&a_parsed, &crypto, |_| {
            unreachable!("A is a fresh object")
        }).unwrap();
        assert_eq!(decoded, original_a);

        assert_eq!(account.blocks_used, before_blocks_used - report.blocks_freed as u64);
    }

    #[tokio::test]
    async fn untouched_entries_are_not_marked() {
        let crypto = crypto();
        let mut dir = DirectoryObject::new(ObjectId::from(2), ObjectId::ROOT);
        dir.add_entry(entry(1, EntryFlags::FILE, 9_999, 1));
        let store = MemoryStore::new();
        let mut account = coffer_account::AccountInfo::new(1, 100, 200);
        let policy = RetentionPolicy::default();
        let report =
            run_directory_pass(&mut dir, &store, &mut account, &crypto, &policy, 10_000).await.unwrap();
        assert_eq!(report.marked_remove_asap, 0);
        assert_eq!(report.collapsed, 0);
    }
}
