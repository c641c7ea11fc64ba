//! Opens one live account: its writer-slot-guarded `AccountInfo`, its
//! record store, and the key-material-derived crypto context, then spawns
//! its housekeeping task. One of these exists per configured account for
//! the lifetime of the server process — mirroring `s5_node::S5Node`
//! holding one `BlobStore` per configured store section.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use coffer_account::AccountHandle;
use coffer_core::crypto::CryptoContext;
use coffer_core::ObjectId;
use coffer_housekeeping::{DirectoryProvider, RetentionPolicy};
use coffer_store::RecordStore;
use coffer_store_local::LocalStore;

use crate::config::{AccountConfig, ServerConfig};
use crate::provider::StoreDirectoryProvider;

pub struct Account {
    pub id: u64,
    pub handle: Arc<AccountHandle>,
    pub store: Arc<dyn RecordStore>,
    pub provider: Arc<dyn DirectoryProvider>,
    pub crypto: Arc<CryptoContext>,
    pub policy: RetentionPolicy,
    pub root_dir_id: ObjectId,
    pub(crate) housekeeping: Option<tokio::task::JoinHandle<()>>,
}

impl Account {
    pub fn open(server: &ServerConfig, account_id: u64, account_config: &AccountConfig) -> anyhow::Result<Self> {
        let soft_limit = account_config.soft_limit_blocks.unwrap_or(server.default_soft_limit_blocks);
        let hard_limit = account_config.hard_limit_blocks.unwrap_or(server.default_hard_limit_blocks);

        let handle = Arc::new(AccountHandle::open(&account_config.root, account_id, soft_limit, hard_limit)?);
        let store: Arc<dyn RecordStore> = Arc::new(LocalStore::open(&account_config.root)?);
        let crypto = Arc::new(CryptoContext::load(account_config.root.join("key_material.bin"))?);
        let provider: Arc<dyn DirectoryProvider> =
            Arc::new(StoreDirectoryProvider { store: store.clone(), crypto: crypto.clone() });
        let policy = RetentionPolicy::new(
            std::time::Duration::from_secs(server.old_version_retention_secs),
            std::time::Duration::from_secs(server.deleted_retention_secs),
        );

        Ok(Self {
            id: account_id,
            handle,
            store,
            provider,
            crypto,
            policy,
            root_dir_id: ObjectId::ROOT,
            housekeeping: None,
        })
    }

    pub fn spawn_housekeeping(&mut self, server: &ServerConfig) {
        let account = self.handle.clone();
        let provider = self.provider.clone();
        let store = self.store.clone();
        let crypto = self.crypto.clone();
        let root_dir_id = self.root_dir_id;
        let policy = self.policy.clone();
        let interval = server.housekeeping_interval();

        self.housekeeping = Some(coffer_housekeeping::worker::spawn(
            account,
            provider,
            store,
            crypto,
            root_dir_id,
            policy,
            interval,
            now_unix,
        ));
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        if let Some(handle) = self.housekeeping.take() {
            handle.abort();
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
