//! The tree-walking seam: `coffer_housekeeping` only knows how to run a pass over one
//! already-loaded [`DirectoryObject`]; something that can enumerate
//! subdirectories and load/save them by id is supplied by the caller. In
//! production that's `coffer_server`, backed by a [`coffer_store::RecordStore`];
//! tests use a small in-memory implementation.

use async_trait::async_trait;
use coffer_core::error::Result;
use coffer_core::ObjectId;
use coffer_dirformat::DirectoryObject;

#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    async fn load(&self, id: ObjectId) -> Result<DirectoryObject>;
    async fn save(&self, dir: &DirectoryObject) -> Result<()>;
    async fn delete(&self, id: ObjectId) -> Result<()>;
}
