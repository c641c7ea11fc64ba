//! The error kinds surfaced by the core codecs, shared across every crate
//! that speaks the on-disk formats.

use thiserror::Error;

/// Non-fatal control signals returned by the restore engine. These are not
/// failures in the usual sense — `ResumePossible` and `TargetExists` are
/// routine outcomes a caller branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Complete,
    ResumePossible,
    TargetExists,
    TargetPathNotFound,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("bad magic: expected one of the known header constants")]
    BadMagic,

    #[error("backup store file is structurally inconsistent: {0}")]
    BadBackupStoreFile(String),

    #[error("partial read: stream ended before {expected} bytes were available ({got} read)")]
    PartialRead { expected: usize, got: usize },

    #[error("combine source is incomplete: entry {index} has a non-positive encoded_size")]
    FromFileIsIncomplete { index: usize },

    #[error("combine operands disagree: expected other_file_id {expected}, found {found}")]
    OnCombineDifferentFiles { expected: u64, found: u64 },

    #[error("could not load client key material: {0}")]
    CouldntLoadClientKeyMaterial(String),

    #[error("invalid backup store filename: {0}")]
    InvalidBackupStoreFilename(String),

    #[error("could not find entry {0} in directory")]
    CouldNotFindEntryInDirectory(u64),

    #[error("quota exceeded: upload would push blocks_used to {would_be}, hard limit is {hard_limit}")]
    QuotaExceeded { would_be: u64, hard_limit: u64 },

    #[error("account busy: writer slot unavailable within the configured timeout")]
    AccountBusy,

    #[error("restore: {0:?}")]
    Restore(RestoreStatus),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
