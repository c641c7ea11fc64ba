//! `AccountHandle`: an `AccountInfo` guarded by a [`WriterSlot`] and bound
//! to an on-disk path, saved via write-to-temp + atomic rename — grounded
//! in `s5_fs::snapshots::SnapshotIndex::persist`'s `NamedTempFile` dance,
//! generalized from that crate's `std::fs::write`-based root-file save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_core::error::Result;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::info::AccountInfo;
use crate::lock::WriterSlot;

pub struct AccountHandle {
    path: PathBuf,
    slot: WriterSlot<AccountInfo>,
}

impl AccountHandle {
    pub fn new(path: impl Into<PathBuf>, info: AccountInfo) -> Self {
        Self { path: path.into(), slot: WriterSlot::new(info) }
    }

    /// Loads `<path>/account_info.bin`, or creates a fresh account record
    /// if none exists yet.
    pub fn open(account_root: impl AsRef<Path>, account_id: u64, soft_limit: u64, hard_limit: u64) -> Result<Self> {
        let path = account_root.as_ref().join("account_info.bin");
        let info = match std::fs::read(&path) {
            Ok(bytes) => AccountInfo::read(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                AccountInfo::new(account_id, soft_limit, hard_limit)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(path, info))
    }

    pub fn slot(&self) -> &WriterSlot<AccountInfo> {
        &self.slot
    }

    /// Acquires the writer slot and persists the record if dirty. Saving a
    /// clean record is a no-op — housekeeping and the request handler both
    /// call this liberally without worrying about redundant disk writes.
    pub async fn save(&self, timeout: Duration) -> Result<()> {
        let mut guard = self.slot.write(timeout).await?;
        if !guard.is_dirty() {
            return Ok(());
        }
        let bytes = guard.write();
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        use std::io::Write;
        temp_file.write_all(&bytes)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;
        *guard = AccountInfo::read(&bytes)?;
        debug!(path = %self.path.display(), "saved account info");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::ObjectId;

    #[tokio::test]
    async fn open_creates_fresh_account_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let handle = AccountHandle::open(dir.path(), 1, 100, 200).unwrap();
        let guard = handle.slot().read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.account_id, 1);
        assert_eq!(guard.last_object_id, ObjectId::ROOT);
    }

    #[tokio::test]
    async fn save_then_reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let handle = AccountHandle::open(dir.path(), 1, 100, 200).unwrap();
            {
                let mut guard = handle.slot().write(Duration::from_secs(1)).await.unwrap();
                guard.allocate_object_id();
                guard.change_blocks_used(3);
            }
            handle.save(Duration::from_secs(1)).await.unwrap();
        }
        let handle = AccountHandle::open(dir.path(), 1, 100, 200).unwrap();
        let guard = handle.slot().read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.blocks_used, 3);
        assert_eq!(guard.last_object_id, ObjectId::from(2));
    }

    #[tokio::test]
    async fn save_is_a_noop_on_clean_record() {
        let dir = tempfile::tempdir().unwrap();
        let handle = AccountHandle::open(dir.path(), 1, 100, 200).unwrap();
        handle.save(Duration::from_secs(1)).await.unwrap();
        assert!(!dir.path().join("account_info.bin").exists());
    }
}
