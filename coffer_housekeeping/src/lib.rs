//! Per-account housekeeping: the periodic sweep that ages out superseded
//! file versions and deleted entries, collapses diff chains around the
//! entries it prunes, and drains the deleted-directory queue.
//!
//! [`worker::spawn`] is the entry point `coffer_server` calls once per
//! live account; everything else in this crate is the pure logic that
//! drives one pass, factored out so it can be driven deterministically in
//! tests without a running server.

pub mod collapse;
pub mod pass;
pub mod policy;
pub mod provider;
pub mod queue;
pub mod worker;

pub use collapse::{collapse_entry, CollapseReport};
pub use pass::{run_directory_pass, DirectoryPassReport};
pub use policy::RetentionPolicy;
pub use provider::DirectoryProvider;
pub use queue::{process_deleted_directory_queue, QueueReport};
pub use worker::{run_account_pass, spawn, DEFAULT_INTERVAL, WRITER_SLOT_TIMEOUT};
