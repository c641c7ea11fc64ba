//! Client-side machinery that doesn't belong on the server: the local
//! remote-block-index cache, the fresh-vs-diff upload decision it feeds,
//! and the restore engine that walks a remote tree back onto local disk.

pub mod cache;
pub mod config;
pub mod diffstate;
pub mod restore;

pub use cache::{CachedRemoteIndex, RemoteIndexCache, DEFAULT_REMOTE_INDEX_TTL};
pub use config::ClientConfig;
pub use diffstate::{plan_upload, UploadPlan, UploadStrategy, MATCH_RATIO_THRESHOLD};
pub use restore::{restore_tree, RemoteSource, RestoreOptions, RESTORE_JOURNAL_FLUSH_BYTES};
