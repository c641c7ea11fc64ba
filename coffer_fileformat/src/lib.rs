//! The file object format — the hardest and largest component of the
//! backup engine: fresh encoding, diff encoding against a prior object,
//! structural verification, decoding, combining a diff with its base,
//! combining two diffs, reverse-diffing, and the lazy index-only combine.
//!
//! Every operation here works over in-memory byte buffers rather than
//! sockets; the async stream layer that feeds bytes in from a connection
//! lives in `coffer_server` and `coffer_client`. This mirrors the way the
//! rest of the backup engine treats a "file object" as an opaque,
//! self-describing blob the server never needs to parse.

pub mod chain;
pub mod chunker;
pub mod combine;
pub mod decode;
pub mod encode;
pub mod header;
pub mod index;
pub mod retarget;
pub mod reverse;
pub mod rolling;
pub mod verify;

pub use header::{FileHeader, Magic};
pub use index::{BlockIndexEntry, IndexHeader};
