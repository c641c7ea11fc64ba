//! The record-store interface: a generic key→value store the server
//! persists objects through. The actual backing engine is treated as an
//! external collaborator — only this contract lives here. Two
//! implementations satisfy it: `coffer_store_local` (redb-backed) and
//! `coffer_store_memory` (for tests).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use coffer_core::ObjectId;

/// A record-store key is an `ObjectId` scoped to one account; the store
/// itself is already opened per-account (one database/table per account
/// root), so no account-id needs to travel through this trait.
#[async_trait]
pub trait RecordStore: std::fmt::Debug + Send + Sync + 'static {
    async fn put(&self, id: ObjectId, bytes: Bytes) -> Result<()>;

    async fn get(&self, id: ObjectId) -> Result<Option<Bytes>>;

    async fn delete(&self, id: ObjectId) -> Result<()>;

    /// Lists every id currently stored, in ascending order. The
    /// "iteration by key prefix" contract degenerates to "all keys" here
    /// because every key in one account's store already shares the account
    /// prefix (the store is opened per-account).
    async fn list_ids(&self) -> Result<Vec<ObjectId>>;

    /// Flushes the store to stable storage. A no-op for purely in-memory
    /// implementations.
    async fn sync(&self) -> Result<()>;
}
