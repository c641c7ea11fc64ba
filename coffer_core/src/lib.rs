//! Types and traits shared by all coffer crates.
//!
//! `coffer_core` defines the wire-stable primitives of the backup object
//! model — object ids, error kinds, crypto contexts, the filename and
//! attribute codecs, and the stream helpers every higher-level format reads
//! and writes through. Nothing here knows about files-on-disk-as-directory-
//! entries or housekeeping policy; that lives in `coffer_fileformat`,
//! `coffer_dirformat`, and `coffer_account`.

pub mod attributes;
pub mod crypto;
pub mod error;
pub mod filename;
pub mod object_id;
pub mod stream;

pub use error::{BackupError, Result};
pub use object_id::ObjectId;
