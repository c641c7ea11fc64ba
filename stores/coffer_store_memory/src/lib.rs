//! An in-memory `RecordStore`, in the shape of `blob_stores/memory` (a
//! `DashMap`-backed store behind the same `Store` trait shape). Used by
//! the test suites across the workspace and by `coffer_cli` when no
//! persistent account root is configured.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use coffer_core::ObjectId;
use coffer_store::RecordStore;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectId, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, id: ObjectId, bytes: Bytes) -> Result<()> {
        self.objects.lock().await.insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bytes>> {
        Ok(self.objects.lock().await.get(&id).cloned())
    }

    async fn delete(&self, id: ObjectId) -> Result<()> {
        self.objects.lock().await.remove(&id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<ObjectId>> {
        Ok(self.objects.lock().await.keys().copied().collect())
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.put(ObjectId::from(1), Bytes::from_static(b"hello")).await.unwrap();
        let got = store.get(ObjectId::from(1)).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryStore::new();
        store.put(ObjectId::from(2), Bytes::from_static(b"x")).await.unwrap();
        store.delete(ObjectId::from(2)).await.unwrap();
        assert_eq!(store.get(ObjectId::from(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_ids_is_sorted() {
        let store = MemoryStore::new();
        for id in [5u64, 1, 3] {
            store.put(ObjectId::from(id), Bytes::new()).await.unwrap();
        }
        assert_eq!(
            store.list_ids().await.unwrap(),
            vec![ObjectId::from(1), ObjectId::from(3), ObjectId::from(5)]
        );
    }
}
