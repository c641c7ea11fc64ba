//! Decoding a file object back to cleartext. Positive entries
//! decrypt from this object's own payload; non-positive entries need an
//! accessor into the prior object's payload, since borrows cannot be
//! materialized without it.

use coffer_core::attributes::StoreAttributes;
use coffer_core::crypto::{BlockCipher, CryptoContext};
use coffer_core::error::{BackupError, Result};
use coffer_core::filename::StoreFilename;

use crate::header::FileHeader;
use crate::index::{encrypted_entries_len, read_entries_encrypted, BlockIndexEntry, IndexHeader};

/// A parsed file object, ready for block-by-block decoding.
pub struct ParsedFileObject<'a> {
    pub header: FileHeader,
    pub filename: StoreFilename,
    pub attributes: StoreAttributes,
    pub index_header: IndexHeader,
    pub entries: Vec<BlockIndexEntry>,
    payload: &'a [u8],
}

pub fn parse(bytes: &[u8], crypto: &CryptoContext) -> Result<ParsedFileObject<'_>> {
    let cipher = crypto.file_block_cipher();
    let (header, mut offset) = FileHeader::read(bytes)?;
    let (filename, name_len) =
        StoreFilename::read(&bytes[offset..], crypto.filename_cipher().as_ref(), crypto.filename_iv())?;
    offset += name_len;

    if bytes.len() < offset + 4 {
        return Err(BackupError::PartialRead { expected: offset + 4, got: bytes.len() });
    }
    let attrs_hash = 0u64; // hash is carried by the directory entry, not the file object body
    let (attributes, attrs_len) = StoreAttributes::read(&bytes[offset..], attrs_hash)?;
    offset += attrs_len;

    let entry_cipher = crypto.file_block_entry_cipher();
    let trailer_len =
        IndexHeader::WIRE_LEN + encrypted_entries_len(header.num_blocks, entry_cipher.as_ref());
    if bytes.len() < trailer_len || bytes.len() - trailer_len < offset {
        return Err(BackupError::BadBackupStoreFile("trailer does not fit after payload".into()));
    }
    let trailer_start = bytes.len() - trailer_len;
    let payload = &bytes[offset..trailer_start];
    let (index_header, index_offset) = IndexHeader::read(&bytes[trailer_start..])?;
    let (entries, _) = read_entries_encrypted(
        &bytes[trailer_start + index_offset..],
        index_header.num_entries,
        entry_cipher.as_ref(),
        crypto.filename_iv(),
    )?;

    Ok(ParsedFileObject { header, filename, attributes, index_header, entries, payload })
}

/// Reassembles cleartext. `prior_block` is called with a 1-indexed block
/// number to fetch that block's cleartext from the prior object named by
/// `index_header.other_file_id`; it is only invoked for diff objects.
///
/// Body content and attributes are decoupled: an attribute-only update
/// never re-encodes the body, so the attributes a caller should apply are
/// whatever the directory entry currently carries (`parsed.attributes` is
/// only the attributes embedded at encode time). The restore engine reads
/// `entry.attributes` from the directory, not from this function's output.
pub fn decode_to_cleartext(
    parsed: &ParsedFileObject,
    crypto: &CryptoContext,
    mut prior_block: impl FnMut(u64) -> Result<Vec<u8>>,
) -> Result<Vec<u8>> {
    let cipher = crypto.file_block_cipher();
    let iv_len = cipher.iv_len();
    let mut out = Vec::new();
    let mut payload_offset = 0usize;
    for entry in parsed.entries.iter() {
        if entry.is_present() {
            let len = entry.encoded_size as usize;
            if payload_offset + len > parsed.payload.len() {
                return Err(BackupError::PartialRead {
                    expected: payload_offset + len,
                    got: parsed.payload.len(),
                });
            }
            let ciphertext = &parsed.payload[payload_offset..payload_offset + len];
            payload_offset += len;
            let iv = crate::encode::iv_bytes_from_base(entry.iv_base, iv_len);
            let cleartext = cipher.decrypt(&iv, ciphertext)?;
            out.extend_from_slice(&cleartext);
        } else {
            let block_no = entry.borrowed_block_number();
            out.extend_from_slice(&prior_block(block_no)?);
        }
    }
    Ok(out)
}
