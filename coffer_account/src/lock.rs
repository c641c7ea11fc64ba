//! The per-account writer slot: exactly one writer at a time per
//! account, readers share a slot, housekeeping takes the writer slot like
//! any other mutator. Acquisition is blocking with a configurable
//! deadline; past it, the caller gets `AccountBusy` rather than hanging
//! forever — the same timeout-wrapped-acquire idiom `s5_fs::actor` uses
//! around its oneshot channels, generalized here to a `tokio::sync::RwLock`.

use std::time::Duration;

use coffer_core::error::{BackupError, Result};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use std::sync::Arc;

pub struct WriterSlot<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for WriterSlot<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Send + Sync + 'static> WriterSlot<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(RwLock::new(value)) }
    }

    /// Acquires the writer slot, blocking up to `timeout`. Object-id
    /// allocation, directory rewrites, and account-info writes all go
    /// through this; housekeeping acquires it the same way as a client
    /// connection would.
    pub async fn write(&self, timeout: Duration) -> Result<OwnedRwLockWriteGuard<T>> {
        tokio::time::timeout(timeout, self.inner.clone().write_owned())
            .await
            .map_err(|_| BackupError::AccountBusy)
    }

    /// Acquires a shared reader slot; non-mutating operations use this so
    /// multiple clients can read concurrently while no writer holds the
    /// slot.
    pub async fn read(&self, timeout: Duration) -> Result<OwnedRwLockReadGuard<T>> {
        tokio::time::timeout(timeout, self.inner.clone().read_owned())
            .await
            .map_err(|_| BackupError::AccountBusy)
    }
}
