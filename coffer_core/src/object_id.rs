//! The 64-bit object identifier shared by file objects, directory objects,
//! and directory entries.

use std::fmt;

/// Identifies an object within one account's namespace. Monotonically
/// allocated by the account record (`coffer_account::AccountInfo::allocate_object_id`)
/// and never reused, even after the object it named has been deleted, so
/// that `depends_newer`/`depends_older` references stay unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The well-known id of an account's root directory.
    pub const ROOT: ObjectId = ObjectId(1);

    /// Sentinel meaning "no object" — used for `depends_newer`/`depends_older`
    /// fields and the diff trailer's `other_file_id` on complete objects.
    pub const NONE: ObjectId = ObjectId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ObjectId {
    fn from(v: u64) -> Self {
        ObjectId(v)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
