//! The account-info record: object-id allocation, block counters, quota
//! admission, and the deleted-directory queue. Binary layout carries a
//! magic/version prefix followed by the counter fields, with the
//! deleted-directory queue encoded as `u64` count + that many `u64` ids —
//! the same "count + ids" idiom the restore journal uses, since both are
//! length-prefixed id lists.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

const MAGIC_ACCOUNT_INFO: u32 = 0x7a0f_c001;
const VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub account_id: u64,
    pub last_object_id: ObjectId,
    pub blocks_used: u64,
    pub blocks_in_old_files: u64,
    pub blocks_in_deleted_files: u64,
    pub blocks_in_directories: u64,
    pub soft_limit: u64,
    pub hard_limit: u64,
    pub client_store_marker: u64,
    pub deleted_directories: Vec<ObjectId>,
    dirty: bool,
}

impl AccountInfo {
    /// A brand-new account, with object-id 1 reserved for the root
    /// directory (so the first call to `allocate_object_id` returns 2).
    pub fn new(account_id: u64, soft_limit: u64, hard_limit: u64) -> Self {
        Self {
            account_id,
            last_object_id: ObjectId::ROOT,
            blocks_used: 0,
            blocks_in_old_files: 0,
            blocks_in_deleted_files: 0,
            blocks_in_directories: 0,
            soft_limit,
            hard_limit,
            client_store_marker: 0,
            deleted_directories: Vec::new(),
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Monotone 64-bit allocation; ids are never reused, even after the
    /// object they named is deleted, so `depends_newer`/`depends_older`
    /// references stay unambiguous. Callers must persist the account info
    /// (`AccountHandle::save`) before using the returned id.
    pub fn allocate_object_id(&mut self) -> ObjectId {
        self.last_object_id = ObjectId::from(self.last_object_id.as_u64() + 1);
        self.mark_dirty();
        self.last_object_id
    }

    /// Admission check for an upload of `additional_blocks` new payload
    /// blocks: rejected before any object bytes are accepted if it would
    /// push `blocks_used` past the hard limit. A soft-limit breach is only
    /// advisory — returns `Ok(true)` (breached) rather than an error.
    pub fn check_quota(&self, additional_blocks: u64) -> Result<bool> {
        let would_be = self.blocks_used + additional_blocks;
        if would_be > self.hard_limit {
            return Err(BackupError::QuotaExceeded { would_be, hard_limit: self.hard_limit });
        }
        Ok(would_be > self.soft_limit)
    }

    pub fn change_blocks_used(&mut self, delta: i64) {
        self.blocks_used = apply_delta(self.blocks_used, delta);
        self.mark_dirty();
    }

    pub fn change_blocks_in_old_files(&mut self, delta: i64) {
        self.blocks_in_old_files = apply_delta(self.blocks_in_old_files, delta);
        self.mark_dirty();
    }

    pub fn change_blocks_in_deleted_files(&mut self, delta: i64) {
        self.blocks_in_deleted_files = apply_delta(self.blocks_in_deleted_files, delta);
        self.mark_dirty();
    }

    pub fn change_blocks_in_directories(&mut self, delta: i64) {
        self.blocks_in_directories = apply_delta(self.blocks_in_directories, delta);
        self.mark_dirty();
    }

    pub fn set_client_store_marker(&mut self, marker: u64) {
        self.client_store_marker = marker;
        self.mark_dirty();
    }

    /// Idempotent: adding an id already in the queue is a no-op.
    pub fn add_deleted_directory(&mut self, id: ObjectId) {
        if !self.deleted_directories.contains(&id) {
            self.deleted_directories.push(id);
            self.mark_dirty();
        }
    }

    pub fn remove_deleted_directory(&mut self, id: ObjectId) {
        let before = self.deleted_directories.len();
        self.deleted_directories.retain(|d| *d != id);
        if self.deleted_directories.len() != before {
            self.mark_dirty();
        }
    }

    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(MAGIC_ACCOUNT_INFO).unwrap();
        out.write_u8(VERSION).unwrap();
        out.write_u64::<BigEndian>(self.account_id).unwrap();
        out.write_u64::<BigEndian>(self.last_object_id.as_u64()).unwrap();
        out.write_u64::<BigEndian>(self.blocks_used).unwrap();
        out.write_u64::<BigEndian>(self.blocks_in_old_files).unwrap();
        out.write_u64::<BigEndian>(self.blocks_in_deleted_files).unwrap();
        out.write_u64::<BigEndian>(self.blocks_in_directories).unwrap();
        out.write_u64::<BigEndian>(self.soft_limit).unwrap();
        out.write_u64::<BigEndian>(self.hard_limit).unwrap();
        out.write_u64::<BigEndian>(self.client_store_marker).unwrap();
        out.write_u64::<BigEndian>(self.deleted_directories.len() as u64).unwrap();
        for id in &self.deleted_directories {
            out.write_u64::<BigEndian>(id.as_u64()).unwrap();
        }
        out
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let needed = 4 + 1 + 8 * 9;
        if bytes.len() < needed {
            return Err(BackupError::PartialRead { expected: needed, got: bytes.len() });
        }
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != MAGIC_ACCOUNT_INFO {
            return Err(BackupError::BadMagic);
        }
        let version = cursor.read_u8()?;
        if version != VERSION {
            return Err(BackupError::BadBackupStoreFile(format!(
                "unsupported account info version {version}"
            )));
        }
        let account_id = cursor.read_u64::<BigEndian>()?;
        let last_object_id = ObjectId::from(cursor.read_u64::<BigEndian>()?);
        let blocks_used = cursor.read_u64::<BigEndian>()?;
        let blocks_in_old_files = cursor.read_u64::<BigEndian>()?;
        let blocks_in_deleted_files = cursor.read_u64::<BigEndian>()?;
        let blocks_in_directories = cursor.read_u64::<BigEndian>()?;
        let soft_limit = cursor.read_u64::<BigEndian>()?;
        let hard_limit = cursor.read_u64::<BigEndian>()?;
        let client_store_marker = cursor.read_u64::<BigEndian>()?;
        let queue_len = cursor.read_u64::<BigEndian>()?;
        let mut deleted_directories = Vec::with_capacity(queue_len as usize);
        for _ in 0..queue_len {
            deleted_directories.push(ObjectId::from(cursor.read_u64::<BigEndian>()?));
        }
        Ok(Self {
            account_id,
            last_object_id,
            blocks_used,
            blocks_in_old_files,
            blocks_in_deleted_files,
            blocks_in_directories,
            soft_limit,
            hard_limit,
            client_store_marker,
            deleted_directories,
            dirty: false,
        })
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value + delta as u64
    } else {
        value.saturating_sub((-delta) as u64)
    }
}
