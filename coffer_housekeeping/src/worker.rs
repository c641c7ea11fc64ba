//! The long-lived per-account housekeeping task. Grounded in `s5_node`'s
//! fire-and-forget `run_file_sync` call — log the error and
//! keep the service alive rather than letting one bad pass take the
//! process down — generalized from a one-shot call into a recurring
//! `tokio::time::interval` loop.

use std::sync::Arc;
use std::time::Duration;

use coffer_account::AccountHandle;
use coffer_core::crypto::CryptoContext;
use coffer_dirformat::check_and_fix;
use coffer_store::RecordStore;
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::pass::run_directory_pass;
use crate::policy::RetentionPolicy;
use crate::provider::DirectoryProvider;
use crate::queue::process_deleted_directory_queue;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub const WRITER_SLOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs every module of one housekeeping pass for a single account: the
/// root directory sweep (recursing into subdirectories), the
/// deleted-directory queue, and a final account-info save. `now` is the
/// current unix timestamp supplied by the caller.
pub async fn run_account_pass(
    account: &AccountHandle,
    provider: &dyn DirectoryProvider,
    store: &dyn RecordStore,
    crypto: &CryptoContext,
    root_id: coffer_core::ObjectId,
    policy: &RetentionPolicy,
    now: u64,
) -> coffer_core::error::Result<()> {
    let mut guard = account.slot().write(WRITER_SLOT_TIMEOUT).await?;

    walk_and_collect(provider, store, &mut guard, crypto, root_id, policy, now).await?;
    process_deleted_directory_queue(provider, &mut guard).await?;

    Ok(())
}

/// Recurses into subdirectories after running each one's pass. Hand-boxed
/// rather than `async fn` because a self-recursive async function has no
/// statically known stack frame size.
fn walk_and_collect<'a>(
    provider: &'a dyn DirectoryProvider,
    store: &'a dyn RecordStore,
    account: &'a mut coffer_account::AccountInfo,
    crypto: &'a CryptoContext,
    dir_id: coffer_core::ObjectId,
    policy: &'a RetentionPolicy,
    now: u64,
) -> BoxFuture<'a, coffer_core::error::Result<()>> {
    Box::pin(async move {
        let mut dir = provider.load(dir_id).await?;
        run_directory_pass(&mut dir, store, account, crypto, policy, now).await?;
        check_and_fix(&mut dir);

        let subdirs: Vec<coffer_core::ObjectId> = dir
            .iter_filtered(coffer_dirformat::EntryFlags::DIR, coffer_dirformat::EntryFlags::DELETED)
            .map(|e| e.object_id)
            .collect();

        provider.save(&dir).await?;

        for child in subdirs {
            walk_and_collect(provider, store, account, crypto, child, policy, now).await?;
        }
        Ok(())
    })
}

/// Spawns the recurring housekeeping task for one account. The returned
/// `JoinHandle` is aborted when the caller drops it; `coffer_server` holds
/// one per live account for the lifetime of the process.
pub fn spawn(
    account: Arc<AccountHandle>,
    provider: Arc<dyn DirectoryProvider>,
    store: Arc<dyn RecordStore>,
    crypto: Arc<CryptoContext>,
    root_id: coffer_core::ObjectId,
    policy: RetentionPolicy,
    interval: Duration,
    now_fn: impl Fn() -> u64 + Send + Sync + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = now_fn();
            match run_account_pass(
                &account,
                provider.as_ref(),
                store.as_ref(),
                crypto.as_ref(),
                root_id,
                &policy,
                now,
            )
            .await
            {
                Ok(()) => info!(%root_id, "housekeeping pass complete"),
                Err(err) => warn!(%root_id, "housekeeping pass failed: {err}"),
            }
            if let Err(err) = account.save(WRITER_SLOT_TIMEOUT).await {
                warn!(%root_id, "failed to persist account info after housekeeping: {err}");
            }
        }
    })
}
