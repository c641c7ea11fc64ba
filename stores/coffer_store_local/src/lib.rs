//! A `redb`-backed `RecordStore`, one database per account, in the shape of
//! `registries/redb::RedbRegistry`: synchronous redb transactions run
//! inside `spawn_blocking` so the async request-handling tasks never block
//! on disk I/O.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use coffer_core::ObjectId;
use coffer_store::RecordStore;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

const TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("objects");

#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish()
    }
}

impl LocalStore {
    /// Opens (creating if absent) `<account_root>/objects.redb`, ensuring
    /// the `objects` table exists before returning so a fresh store's first
    /// access can safely be a read.
    pub fn open<P: AsRef<Path>>(account_root: P) -> Result<Self> {
        std::fs::create_dir_all(account_root.as_ref())?;
        let db = Database::create(account_root.as_ref().join("objects.redb"))?;
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(TABLE)?;
            }
            write_txn.commit()?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn put(&self, id: ObjectId, bytes: Bytes) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.insert(id.as_u64(), bytes.as_ref())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("redb write task failed: {e}"))?
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bytes>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Bytes>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            Ok(table.get(id.as_u64())?.map(|guard| Bytes::copy_from_slice(guard.value())))
        })
        .await
        .map_err(|e| anyhow!("redb read task failed: {e}"))?
    }

    async fn delete(&self, id: ObjectId) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.remove(id.as_u64())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("redb delete task failed: {e}"))?
    }

    async fn list_ids(&self) -> Result<Vec<ObjectId>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ObjectId>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            let mut ids = Vec::new();
            for row in table.iter()? {
                let (key, _) = row?;
                ids.push(ObjectId::from(key.value()));
            }
            Ok(ids)
        })
        .await
        .map_err(|e| anyhow!("redb iterate task failed: {e}"))?
    }

    async fn sync(&self) -> Result<()> {
        // redb fsyncs on commit by default; nothing extra to flush here.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store.put(ObjectId::from(7), Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(store.get(ObjectId::from(7)).await.unwrap(), Some(Bytes::from_static(b"payload")));
        store.delete(ObjectId::from(7)).await.unwrap();
        assert_eq!(store.get(ObjectId::from(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reopening_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.put(ObjectId::from(1), Bytes::from_static(b"a")).await.unwrap();
        }
        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.get(ObjectId::from(1)).await.unwrap(), Some(Bytes::from_static(b"a")));
    }
}
