//! Translates one protocol [`Request`] into a mutation or read against an
//! [`Account`], acquiring the writer slot for anything that mutates
//! object-ids, directory contents, or account counters (the per-account
//! writer-slot rule). Codec errors are caught by the caller
//! (`serve_connection`) and turned into `Response::Error` frames — this
//! function propagates them with `?` like everything else in the core.

use bytes::Bytes;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;
use coffer_dirformat::{DirectoryEntry, EntryFlags};
use coffer_fileformat::decode::parse as parse_file;
use coffer_fileformat::verify::verify_format;

use crate::account::Account;
use crate::protocol::{Request, Response};

pub async fn handle_request(account: &Account, request: Request) -> Result<Response> {
    match request {
        Request::ListDirectory { dir_id, include_deleted, include_old_versions } => {
            list_directory(account, dir_id, include_deleted, include_old_versions).await
        }
        Request::GetObject { object_id } => get_object(account, object_id).await,
        Request::PutFile { dir_id, bytes, size_in_blocks, attributes_hash } => {
            put_file(account, dir_id, bytes, size_in_blocks, attributes_hash).await
        }
        Request::DeleteFile { dir_id, object_id } => set_deleted(account, dir_id, object_id, true).await,
        Request::DeleteDirectory { dir_id, object_id } => delete_directory(account, dir_id, object_id).await,
        Request::UndeleteDirectory { dir_id, object_id } => undelete_directory(account, dir_id, object_id).await,
    }
}

async fn list_directory(
    account: &Account,
    dir_id: u64,
    include_deleted: bool,
    include_old_versions: bool,
) -> Result<Response> {
    let dir = account.provider.load(ObjectId::from(dir_id)).await?;
    let mut not_set = EntryFlags::empty();
    if !include_deleted {
        not_set |= EntryFlags::DELETED;
    }
    if !include_old_versions {
        not_set |= EntryFlags::OLD_VERSION;
    }
    let bytes = dir.serialize(&account.crypto, EntryFlags::empty(), not_set, true)?;
    Ok(Response::Directory { bytes })
}

async fn get_object(account: &Account, object_id: u64) -> Result<Response> {
    let bytes = account
        .store
        .get(ObjectId::from(object_id))
        .await
        .map_err(store_err)?
        .ok_or(BackupError::CouldNotFindEntryInDirectory(object_id))?;
    Ok(Response::Object { bytes: bytes.to_vec() })
}

/// Admits an already-encoded file object (fresh or diff — the caller
/// decided which via `coffer_client::diffstate`): allocates its id,
/// checks quota, persists it, and links it into the target directory,
/// retiring any existing entry of the same name to `OldVersion`.
///
/// Decides how `RemoveASAP` interacts with attribute-only updates: if the
/// uploaded object is a diff against the existing entry's
/// object-id that borrows every block and contributes none of its own
/// (`size_in_blocks == 0`), its content is byte-for-byte identical to what's
/// already stored — only the attributes changed. In that case the upload
/// is discarded and the existing entry is rewritten in place, with no new
/// object-id, no `OldVersion` flag, and no block-count change.
async fn put_file(
    account: &Account,
    dir_id: u64,
    bytes: Vec<u8>,
    size_in_blocks: u64,
    attributes_hash: u64,
) -> Result<Response> {
    verify_format(&bytes, None, &account.crypto)?;
    let parsed = parse_file(&bytes, &account.crypto)?;
    let filename = parsed.filename.clone();
    let attributes = parsed.attributes.clone();
    let modification_time = parsed.header.modification_time;
    let is_content_identical_diff = size_in_blocks == 0 && !parsed.entries.is_empty();

    let mut dir = account.provider.load(ObjectId::from(dir_id)).await?;
    let cipher = account.crypto.filename_cipher();
    let existing = dir
        .find_matching_clear_name(&filename.cleartext, cipher.as_ref(), account.crypto.filename_iv())?
        .map(|e| e.object_id);

    if let (Some(old_id), true) = (existing, is_content_identical_diff) {
        if parsed.index_header.other_file_id == old_id {
            dir.update_attributes_in_place(old_id, attributes, attributes_hash, modification_time)?;
            account.provider.save(&dir).await?;
            return Ok(Response::Allocated { object_id: old_id.as_u64() });
        }
    }

    let mut guard = account.handle.slot().write(account_writer_timeout()).await?;
    guard.check_quota(size_in_blocks)?;

    let new_id = guard.allocate_object_id();
    account.store.put(new_id, Bytes::from(bytes)).await.map_err(store_err)?;

    if let Some(old_id) = existing {
        if let Some(old_entry) = dir.find_entry_by_id_mut(old_id) {
            old_entry.flags |= EntryFlags::OLD_VERSION;
            old_entry.depends_newer = new_id;
        }
    }

    dir.add_entry(DirectoryEntry {
        modification_time,
        object_id: new_id,
        size_in_blocks,
        attributes_hash,
        flags: EntryFlags::FILE,
        name: filename,
        attributes,
        mark: 0,
        min_mark: 0,
        depends_newer: ObjectId::NONE,
        depends_older: existing.unwrap_or(ObjectId::NONE),
    });

    guard.change_blocks_used(size_in_blocks as i64);
    account.provider.save(&dir).await?;
    drop(guard);
    account.handle.save(account_writer_timeout()).await?;

    Ok(Response::Allocated { object_id: new_id.as_u64() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_account::AccountHandle;
    use coffer_core::attributes::StoreAttributes;
    use coffer_core::crypto::CryptoContext;
    use coffer_core::filename::StoreFilename;
    use coffer_dirformat::DirectoryObject;
    use coffer_fileformat::encode::{encode_diff, encode_fresh};
    use coffer_store_memory::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn crypto() -> Arc<CryptoContext> {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        Arc::new(CryptoContext::load(&key_path).unwrap())
    }

    fn test_account(crypto: Arc<CryptoContext>) -> Account {
        let root = tempfile::tempdir().unwrap();
        let handle = Arc::new(AccountHandle::open(root.path(), 1, 1_000_000, 2_000_000).unwrap());
        let store: Arc<dyn coffer_store::RecordStore> = Arc::new(MemoryStore::new());
        let provider: Arc<dyn coffer_housekeeping::DirectoryProvider> =
            Arc::new(crate::provider::StoreDirectoryProvider { store: store.clone(), crypto: crypto.clone() });
        Account {
            id: 1,
            handle,
            store,
            provider,
            crypto,
            policy: coffer_housekeeping::RetentionPolicy::new(Duration::from_secs(1), Duration::from_secs(1)),
            root_dir_id: ObjectId::ROOT,
            housekeeping: None,
        }
    }

    #[tokio::test]
    async fn put_file_then_attribute_only_reupload_keeps_same_object_id() {
        let crypto = crypto();
        let account = test_account(crypto.clone());
        account.provider.save(&DirectoryObject::new(ObjectId::ROOT, ObjectId::NONE)).await.unwrap();

        let filename = StoreFilename::encrypted("report.txt");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let fresh =
            encode_fresh(&data, ObjectId::ROOT, &filename, &StoreAttributes::empty(), 1, &crypto).unwrap();
        let fresh_parsed = parse_file(&fresh, &crypto).unwrap();
        let present = fresh_parsed.entries.iter().filter(|e| e.is_present()).count() as u64;

        let first = put_file(&account, ObjectId::ROOT.as_u64(), fresh, present, 0).await.unwrap();
        let Response::Allocated { object_id: first_id } = first else { panic!("expected Allocated") };

        // Re-upload identical content with different attributes: a diff
        // against `first_id` that borrows every block and contributes none.
        let new_attrs = StoreAttributes::from_ciphertext(b"mode=0644".to_vec(), 42);
        let diff = encode_diff(
            &data,
            ObjectId::ROOT,
            &filename,
            &new_attrs,
            2,
            &crypto,
            &fresh_parsed.entries,
            ObjectId::from(first_id),
            None,
        )
        .unwrap();
        assert!(!diff.is_completely_different);
        let diff_parsed = parse_file(&diff.bytes, &crypto).unwrap();
        let diff_present = diff_parsed.entries.iter().filter(|e| e.is_present()).count() as u64;
        assert_eq!(diff_present, 0, "identical content should borrow every block");

        let second = put_file(&account, ObjectId::ROOT.as_u64(), diff.bytes, diff_present, 42).await.unwrap();
        let Response::Allocated { object_id: second_id } = second else { panic!("expected Allocated") };
        assert_eq!(second_id, first_id, "attribute-only update must not allocate a new object id");

        let dir = account.provider.load(ObjectId::ROOT).await.unwrap();
        let entry = dir.find_entry_by_id(ObjectId::from(first_id)).unwrap();
        assert!(!entry.flags.contains(EntryFlags::OLD_VERSION));
        assert_eq!(entry.attributes_hash, 42);

        let guard = account.handle.slot().read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.blocks_used, present, "attribute-only update must not change block counts");
    }

    #[tokio::test]
    async fn put_file_content_change_flags_old_version() {
        let crypto = crypto();
        let account = test_account(crypto.clone());
        account.provider.save(&DirectoryObject::new(ObjectId::ROOT, ObjectId::NONE)).await.unwrap();

        let filename = StoreFilename::encrypted("report.txt");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let fresh =
            encode_fresh(&data, ObjectId::ROOT, &filename, &StoreAttributes::empty(), 1, &crypto).unwrap();
        let fresh_parsed = parse_file(&fresh, &crypto).unwrap();
        let present = fresh_parsed.entries.iter().filter(|e| e.is_present()).count() as u64;
        let first = put_file(&account, ObjectId::ROOT.as_u64(), fresh, present, 0).await.unwrap();
        let Response::Allocated { object_id: first_id } = first else { panic!("expected Allocated") };

        let mut changed = data.clone();
        changed.extend_from_slice(b"appended tail");
        let diff = encode_diff(
            &changed,
            ObjectId::ROOT,
            &filename,
            &StoreAttributes::empty(),
            2,
            &crypto,
            &fresh_parsed.entries,
            ObjectId::from(first_id),
            None,
        )
        .unwrap();
        let diff_parsed = parse_file(&diff.bytes, &crypto).unwrap();
        let diff_present = diff_parsed.entries.iter().filter(|e| e.is_present()).count() as u64;
        assert!(diff_present > 0, "appended tail must contribute fresh blocks");

        let second = put_file(&account, ObjectId::ROOT.as_u64(), diff.bytes, diff_present, 0).await.unwrap();
        let Response::Allocated { object_id: second_id } = second else { panic!("expected Allocated") };
        assert_ne!(second_id, first_id);

        let dir = account.provider.load(ObjectId::ROOT).await.unwrap();
        let old_entry = dir.find_entry_by_id(ObjectId::from(first_id)).unwrap();
        assert!(old_entry.flags.contains(EntryFlags::OLD_VERSION));
        assert_eq!(old_entry.depends_newer, ObjectId::from(second_id));
    }
}

async fn set_deleted(account: &Account, dir_id: u64, object_id: u64, deleted: bool) -> Result<Response> {
    let mut dir = account.provider.load(ObjectId::from(dir_id)).await?;
    let entry = dir
        .find_entry_by_id_mut(ObjectId::from(object_id))
        .ok_or(BackupError::CouldNotFindEntryInDirectory(object_id))?;
    if deleted {
        entry.flags |= EntryFlags::DELETED;
    } else {
        entry.flags &= !EntryFlags::DELETED;
    }
    account.provider.save(&dir).await?;
    Ok(Response::Ok)
}

async fn delete_directory(account: &Account, dir_id: u64, object_id: u64) -> Result<Response> {
    set_deleted(account, dir_id, object_id, true).await?;
    let mut guard = account.handle.slot().write(account_writer_timeout()).await?;
    guard.add_deleted_directory(ObjectId::from(object_id));
    drop(guard);
    account.handle.save(account_writer_timeout()).await?;
    Ok(Response::Ok)
}

async fn undelete_directory(account: &Account, dir_id: u64, object_id: u64) -> Result<Response> {
    set_deleted(account, dir_id, object_id, false).await?;
    let mut guard = account.handle.slot().write(account_writer_timeout()).await?;
    guard.remove_deleted_directory(ObjectId::from(object_id));
    drop(guard);
    account.handle.save(account_writer_timeout()).await?;
    Ok(Response::Ok)
}

fn account_writer_timeout() -> std::time::Duration {
    coffer_housekeeping::WRITER_SLOT_TIMEOUT
}

fn store_err(e: anyhow::Error) -> BackupError {
    BackupError::BadBackupStoreFile(e.to_string())
}
