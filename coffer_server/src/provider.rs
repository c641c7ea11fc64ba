//! Bridges `coffer_housekeeping::DirectoryProvider` to a `RecordStore` plus
//! the account's crypto context, so the housekeeping sweep can load/save
//! directories without knowing anything about storage or encryption.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;
use coffer_dirformat::{DirectoryObject, EntryFlags};
use coffer_housekeeping::DirectoryProvider;
use coffer_store::RecordStore;

pub struct StoreDirectoryProvider {
    pub store: Arc<dyn RecordStore>,
    pub crypto: Arc<CryptoContext>,
}

fn store_err(e: anyhow::Error) -> BackupError {
    BackupError::BadBackupStoreFile(e.to_string())
}

#[async_trait]
impl DirectoryProvider for StoreDirectoryProvider {
    async fn load(&self, id: ObjectId) -> Result<DirectoryObject> {
        let bytes = self
            .store
            .get(id)
            .await
            .map_err(store_err)?
            .ok_or(BackupError::CouldNotFindEntryInDirectory(id.as_u64()))?;
        DirectoryObject::parse(&bytes, &self.crypto)
    }

    async fn save(&self, dir: &DirectoryObject) -> Result<()> {
        let bytes = dir.serialize(&self.crypto, EntryFlags::empty(), EntryFlags::empty(), true)?;
        self.store.put(dir.own_id, Bytes::from(bytes)).await.map_err(store_err)
    }

    async fn delete(&self, id: ObjectId) -> Result<()> {
        self.store.delete(id).await.map_err(store_err)
    }
}
