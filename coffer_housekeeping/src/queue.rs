//! The deleted-directory queue: a directory object is only physically
//! removed once every entry inside it has been pruned and
//! its blocks returned to the account's counters. Until then it stays
//! queued and gets re-checked on the next pass.

use coffer_account::AccountInfo;
use coffer_core::error::Result;
use coffer_dirformat::EntryFlags;

use crate::provider::DirectoryProvider;

#[derive(Debug, Default)]
pub struct QueueReport {
    pub removed: u64,
    pub still_pending: u64,
}

pub async fn process_deleted_directory_queue(
    provider: &dyn DirectoryProvider,
    account: &mut AccountInfo,
) -> Result<QueueReport> {
    let mut report = QueueReport::default();
    let pending = account.deleted_directories.clone();

    for dir_id in pending {
        let dir = match provider.load(dir_id).await {
            Ok(dir) => dir,
            Err(_) => {
                // Already gone from the store; just drop it from the queue.
                account.remove_deleted_directory(dir_id);
                report.removed += 1;
                continue;
            }
        };

        let fully_pruned = dir
            .iter_filtered(EntryFlags::empty(), EntryFlags::empty())
            .next()
            .is_none();

        if fully_pruned {
            provider.delete(dir_id).await?;
            account.remove_deleted_directory(dir_id);
            account.change_blocks_in_directories(-1);
            report.removed += 1;
        } else {
            report.still_pending += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coffer_core::crypto::CryptoContext;
    use coffer_core::error::{BackupError, Result as CoreResult};
    use coffer_core::ObjectId;
    use coffer_dirformat::{DirectoryEntry, DirectoryObject};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn crypto() -> CryptoContext {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 29 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    /// Stores directories as serialized bytes, like a real `RecordStore`
    /// would, so `load` returns a faithful copy rather than a stand-in.
    struct FakeProvider {
        crypto: CryptoContext,
        bytes: Mutex<HashMap<ObjectId, Vec<u8>>>,
    }

    #[async_trait]
    impl DirectoryProvider for FakeProvider {
        async fn load(&self, id: ObjectId) -> CoreResult<DirectoryObject> {
            let bytes = self
                .bytes
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or(BackupError::CouldNotFindEntryInDirectory(id.as_u64()))?;
            DirectoryObject::parse(&bytes, &self.crypto)
        }

        async fn save(&self, dir: &DirectoryObject) -> CoreResult<()> {
            use coffer_dirformat::EntryFlags;
            let serialized =
                dir.serialize(&self.crypto, EntryFlags::empty(), EntryFlags::empty(), true)?;
            self.bytes.lock().await.insert(dir.own_id, serialized);
            Ok(())
        }

        async fn delete(&self, id: ObjectId) -> CoreResult<()> {
            self.bytes.lock().await.remove(&id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_queued_directory_is_removed() {
        let crypto = crypto();
        let provider = FakeProvider { crypto, bytes: Mutex::new(HashMap::new()) };
        let empty_dir = DirectoryObject::new(ObjectId::from(5), ObjectId::ROOT);
        provider.save(&empty_dir).await.unwrap();

        let mut account = coffer_account::AccountInfo::new(1, 100, 200);
        account.add_deleted_directory(ObjectId::from(5));

        let report = process_deleted_directory_queue(&provider, &mut account).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(account.deleted_directories.is_empty());
        assert!(provider.load(ObjectId::from(5)).await.is_err());
    }

    #[tokio::test]
    async fn directory_with_remaining_entries_stays_queued() {
        let crypto = crypto();
        let provider = FakeProvider { crypto, bytes: Mutex::new(HashMap::new()) };
        let mut dir = DirectoryObject::new(ObjectId::from(6), ObjectId::ROOT);
        dir.add_entry(DirectoryEntry {
            modification_time: 1,
            object_id: ObjectId::from(20),
            size_in_blocks: 1,
            attributes_hash: 0,
            flags: coffer_dirformat::EntryFlags::FILE,
            name: coffer_core::filename::StoreFilename::encrypted("still-here.txt"),
            attributes: coffer_core::attributes::StoreAttributes::empty(),
            mark: 0,
            min_mark: 0,
            depends_newer: ObjectId::NONE,
            depends_older: ObjectId::NONE,
        });
        provider.save(&dir).await.unwrap();

        let mut account = coffer_account::AccountInfo::new(1, 100, 200);
        account.add_deleted_directory(ObjectId::from(6));

        let report = process_deleted_directory_queue(&provider, &mut account).await.unwrap();
        assert_eq!(report.still_pending, 1);
        assert_eq!(account.deleted_directories, vec![ObjectId::from(6)]);
    }

    #[tokio::test]
    async fn nonexistent_queue_entry_is_dropped() {
        let crypto = crypto();
        let provider = FakeProvider { crypto, bytes: Mutex::new(HashMap::new()) };
        let mut account = coffer_account::AccountInfo::new(1, 100, 200);
        account.add_deleted_directory(ObjectId::from(9));

        let report = process_deleted_directory_queue(&provider, &mut account).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(account.deleted_directories.is_empty());
    }
}
