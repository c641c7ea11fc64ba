//! Account info & quota: the per-account counters, admission policy,
//! object-id allocation, and deleted-directory queue, plus the
//! writer-slot lock every mutating operation in the system goes through.

pub mod handle;
pub mod info;
pub mod lock;

pub use handle::AccountHandle;
pub use info::AccountInfo;
pub use lock::WriterSlot;
