//! Cheap structural verification of an encoded file object: check
//! magic, read counts, verify the payload region size against the trailer,
//! and verify no borrow references a block beyond the prior object's count.

use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

use crate::header::FileHeader;
use crate::index::{encrypted_entries_len, read_entries_encrypted, IndexHeader};

pub struct VerifiedFormat {
    pub container_id: ObjectId,
    pub other_file_id: ObjectId,
    pub num_blocks: u64,
}

/// Walks the structure of `bytes` (a complete encoded file object). The
/// trailer is encrypted, so unlike the rest of this check it is not purely
/// structural — `crypto` is needed to decrypt the block-index entries before
/// their sizes and borrow references can be validated. `prior_block_count`
/// is required whenever the object might be a diff, to bound-check borrow
/// references; pass `None` only when the caller already knows the object is
/// complete.
pub fn verify_format(
    bytes: &[u8],
    prior_block_count: Option<u64>,
    crypto: &CryptoContext,
) -> Result<VerifiedFormat> {
    let (header, mut offset) = FileHeader::read(bytes)?;

    // Skip the encrypted name: its own 2-byte length header gives the span.
    if bytes.len() < offset + 2 {
        return Err(BackupError::PartialRead { expected: offset + 2, got: bytes.len() });
    }
    let name_len = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]) >> 2;
    offset += name_len as usize;

    // Skip the attributes block: a 4-byte length prefix.
    if bytes.len() < offset + 4 {
        return Err(BackupError::PartialRead { expected: offset + 4, got: bytes.len() });
    }
    let attrs_len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4 + attrs_len;

    if bytes.len() < offset {
        return Err(BackupError::PartialRead { expected: offset, got: bytes.len() });
    }

    // The trailer sits at the end; locate it by walking forward from the
    // payload start using the header's declared block count once we've
    // parsed the index header, which in this on-disk layout immediately
    // follows the payload region. We find it by scanning for the index
    // header at `bytes.len() - (entries_size + IndexHeader::WIRE_LEN)`.
    let entry_cipher = crypto.file_block_entry_cipher();
    let trailer_len =
        IndexHeader::WIRE_LEN + encrypted_entries_len(header.num_blocks, entry_cipher.as_ref());
    if bytes.len() < trailer_len {
        return Err(BackupError::BadBackupStoreFile("trailer shorter than declared block count".into()));
    }
    let trailer_start = bytes.len() - trailer_len;
    if trailer_start < offset {
        return Err(BackupError::BadBackupStoreFile("payload region overlaps trailer".into()));
    }
    let payload_len = trailer_start - offset;

    let (index_header, index_offset) = IndexHeader::read(&bytes[trailer_start..])?;
    if index_header.num_entries != header.num_blocks {
        return Err(BackupError::BadBackupStoreFile(
            "index header entry count disagrees with file header block count".into(),
        ));
    }
    let (entries, _) = read_entries_encrypted(
        &bytes[trailer_start + index_offset..],
        index_header.num_entries,
        entry_cipher.as_ref(),
        crypto.filename_iv(),
    )?;

    let mut present_bytes: u64 = 0;
    for (i, entry) in entries.iter().enumerate() {
        if entry.is_present() {
            present_bytes += entry.encoded_size as u64;
        } else {
            let block_no = entry.borrowed_block_number();
            if block_no == 0 {
                return Err(BackupError::BadBackupStoreFile(format!(
                    "entry {i} borrows block 0, but borrow indices are 1-based"
                )));
            }
            if let Some(prior_count) = prior_block_count {
                if block_no > prior_count {
                    return Err(BackupError::BadBackupStoreFile(format!(
                        "entry {i} borrows block {block_no}, but prior object only has {prior_count}"
                    )));
                }
            }
        }
    }

    if present_bytes != payload_len as u64 {
        return Err(BackupError::BadBackupStoreFile(format!(
            "payload region is {payload_len} bytes, but present entries sum to {present_bytes}"
        )));
    }

    Ok(VerifiedFormat {
        container_id: header.container_id,
        other_file_id: index_header.other_file_id,
        num_blocks: header.num_blocks,
    })
}
