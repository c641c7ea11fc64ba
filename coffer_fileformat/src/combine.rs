//! Combining file objects: applying a diff to its base to produce a
//! complete object, composing two diffs into one, and a lazy index-only
//! view of the same composition.

use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

use crate::header::FileHeader;
use crate::index::{
    encrypted_entries_len, read_entries_encrypted, write_entries_encrypted, BlockIndexEntry,
    IndexHeader, IndexMagic,
};

pub(crate) struct ParsedTrailer {
    pub(crate) header_bytes_len: usize,
    pub(crate) payload: Vec<u8>,
    pub(crate) entries: Vec<BlockIndexEntry>,
    pub(crate) index_header: IndexHeader,
}

pub(crate) fn parse_trailer(bytes: &[u8], crypto: &CryptoContext) -> Result<ParsedTrailer> {
    let (header, mut offset) = FileHeader::read(bytes)?;
    if bytes.len() < offset + 2 {
        return Err(BackupError::PartialRead { expected: offset + 2, got: bytes.len() });
    }
    let name_len = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]) >> 2;
    offset += name_len as usize;
    if bytes.len() < offset + 4 {
        return Err(BackupError::PartialRead { expected: offset + 4, got: bytes.len() });
    }
    let attrs_len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4 + attrs_len;

    let entry_cipher = crypto.file_block_entry_cipher();
    let trailer_len =
        IndexHeader::WIRE_LEN + encrypted_entries_len(header.num_blocks, entry_cipher.as_ref());
    if bytes.len() < trailer_len || bytes.len() - trailer_len < offset {
        return Err(BackupError::BadBackupStoreFile("trailer does not fit after payload".into()));
    }
    let trailer_start = bytes.len() - trailer_len;
    let payload = bytes[offset..trailer_start].to_vec();
    let (index_header, index_offset) = IndexHeader::read(&bytes[trailer_start..])?;
    let (entries, _) = read_entries_encrypted(
        &bytes[trailer_start + index_offset..],
        index_header.num_entries,
        entry_cipher.as_ref(),
        crypto.filename_iv(),
    )?;

    Ok(ParsedTrailer { header_bytes_len: offset, payload, entries, index_header })
}

/// Byte offsets of each block within a complete object's payload, plus one
/// trailing sentinel offset equal to the payload's total length — this
/// extra entry is what lets the last block's size be computed the same way
/// as every other block's, as `from_pos[k+1] - from_pos[k]`.
pub(crate) fn from_position_table(entries: &[BlockIndexEntry]) -> Result<Vec<usize>> {
    let mut positions = Vec::with_capacity(entries.len() + 1);
    let mut offset = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        if !entry.is_present() {
            return Err(BackupError::FromFileIsIncomplete { index: i });
        }
        positions.push(offset);
        offset += entry.encoded_size as usize;
    }
    positions.push(offset);
    Ok(positions)
}

/// Applies diff `diff_bytes` to its complete base `from_bytes`, producing a
/// complete object. Mirrors the original two-pass algorithm (`D` walked
/// once for its header/payload, `D2` conceptually walked again for the
/// trailer) by simply re-reading `diff_bytes`'s trailer a second time here,
/// since both crate functions operate on an in-memory buffer rather than a
/// single-pass socket stream.
pub fn combine_file(diff_bytes: &[u8], from_bytes: &[u8], crypto: &CryptoContext) -> Result<Vec<u8>> {
    let diff = parse_trailer(diff_bytes, crypto)?;
    let from = parse_trailer(from_bytes, crypto)?;

    if diff.index_header.other_file_id.is_none() {
        return Err(BackupError::BadBackupStoreFile(
            "combine_file requires a diff object (non-zero other_file_id)".into(),
        ));
    }

    let from_positions = from_position_table(&from.entries)?;

    let mut out_payload = Vec::new();
    let mut out_entries = Vec::with_capacity(diff.entries.len());
    let mut diff_payload_offset = 0usize;

    for entry in &diff.entries {
        if entry.is_present() {
            let len = entry.encoded_size as usize;
            let bytes = &diff.payload[diff_payload_offset..diff_payload_offset + len];
            diff_payload_offset += len;
            out_payload.extend_from_slice(bytes);
            out_entries.push(*entry);
        } else {
            let block_no = entry.borrowed_block_number() as usize;
            if block_no == 0 || block_no > from.entries.len() {
                return Err(BackupError::BadBackupStoreFile(format!(
                    "diff borrows block {block_no}, base object only has {} blocks",
                    from.entries.len()
                )));
            }
            let start = from_positions[block_no - 1];
            let end = from_positions[block_no];
            out_payload.extend_from_slice(&from.payload[start..end]);
            let from_entry = from.entries[block_no - 1];
            out_entries.push(BlockIndexEntry {
                encoded_size: (end - start) as i64,
                clear_size: from_entry.clear_size,
                iv_base: from_entry.iv_base,
                weak_hash: from_entry.weak_hash,
                strong_hash: from_entry.strong_hash,
            });
        }
    }

    let mut out = Vec::with_capacity(diff.header_bytes_len + out_payload.len() + 64);
    out.extend_from_slice(&diff_bytes[..diff.header_bytes_len]);
    out.extend_from_slice(&out_payload);
    let out_index_header =
        IndexHeader { magic: IndexMagic::V1, other_file_id: ObjectId::NONE, num_entries: out_entries.len() as u64 };
    out_index_header.write(&mut out)?;
    write_entries_encrypted(
        &mut out,
        &out_entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )?;
    Ok(out)
}

/// Composes `d1` (a diff against some base) and `d2` (a diff against
/// `d1`, i.e. `d2`'s `other_file_id == d1`'s object id) into a single diff
/// targeting `d1`'s base.
pub fn combine_diff_on_diff(
    d1_bytes: &[u8],
    d1_object_id: ObjectId,
    d2_bytes: &[u8],
    crypto: &CryptoContext,
) -> Result<Vec<u8>> {
    let d1 = parse_trailer(d1_bytes, crypto)?;
    let d2 = parse_trailer(d2_bytes, crypto)?;

    if d2.index_header.other_file_id != d1_object_id {
        return Err(BackupError::OnCombineDifferentFiles {
            expected: d1_object_id.as_u64(),
            found: d2.index_header.other_file_id.as_u64(),
        });
    }

    let mut out_payload = Vec::new();
    let mut out_entries = Vec::with_capacity(d2.entries.len());
    let mut d2_payload_offset = 0usize;
    let mut d1_payload_offsets = Vec::with_capacity(d1.entries.len());
    {
        let mut offset = 0usize;
        for entry in &d1.entries {
            d1_payload_offsets.push(offset);
            if entry.is_present() {
                offset += entry.encoded_size as usize;
            }
        }
    }

    for entry in &d2.entries {
        if entry.is_present() {
            let len = entry.encoded_size as usize;
            let bytes = &d2.payload[d2_payload_offset..d2_payload_offset + len];
            d2_payload_offset += len;
            out_payload.extend_from_slice(bytes);
            out_entries.push(*entry);
        } else {
            let block_no = entry.borrowed_block_number() as usize;
            if block_no == 0 || block_no > d1.entries.len() {
                return Err(BackupError::BadBackupStoreFile(format!(
                    "diff-on-diff borrows block {block_no}, d1 only has {} blocks",
                    d1.entries.len()
                )));
            }
            let d1_entry = d1.entries[block_no - 1];
            if d1_entry.is_present() {
                let start = d1_payload_offsets[block_no - 1];
                let len = d1_entry.encoded_size as usize;
                out_payload.extend_from_slice(&d1.payload[start..start + len]);
                out_entries.push(d1_entry);
            } else {
                // Still borrowed from d1's own base; propagate unchanged.
                out_entries.push(d1_entry);
            }
        }
    }

    let mut out = Vec::with_capacity(d2.header_bytes_len + out_payload.len() + 64);
    out.extend_from_slice(&d2_bytes[..d2.header_bytes_len]);
    out.extend_from_slice(&out_payload);
    let out_index_header = IndexHeader {
        magic: IndexMagic::V1,
        other_file_id: d1.index_header.other_file_id,
        num_entries: out_entries.len() as u64,
    };
    out_index_header.write(&mut out)?;
    write_entries_encrypted(
        &mut out,
        &out_entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )?;
    Ok(out)
}

/// A lazy, read-only, index-only view of `diff ∘ from`: the trailer one
/// would get from [`combine_file`], without materializing any payload
/// bytes. Used by the client to fetch a compact description of what a full
/// combine would look like before deciding whether to pay for it.
pub fn combine_file_indices(
    diff_bytes: &[u8],
    from_bytes: &[u8],
    crypto: &CryptoContext,
) -> Result<Vec<BlockIndexEntry>> {
    let diff = parse_trailer(diff_bytes, crypto)?;
    let from = parse_trailer(from_bytes, crypto)?;
    let from_positions = from_position_table(&from.entries)?;

    let mut out = Vec::with_capacity(diff.entries.len());
    for entry in &diff.entries {
        if entry.is_present() {
            out.push(*entry);
        } else {
            let block_no = entry.borrowed_block_number() as usize;
            if block_no == 0 || block_no > from.entries.len() {
                return Err(BackupError::BadBackupStoreFile(format!(
                    "diff borrows block {block_no}, base object only has {} blocks",
                    from.entries.len()
                )));
            }
            let start = from_positions[block_no - 1];
            let end = from_positions[block_no];
            let from_entry = from.entries[block_no - 1];
            out.push(BlockIndexEntry {
                encoded_size: (end - start) as i64,
                clear_size: from_entry.clear_size,
                iv_base: from_entry.iv_base,
                weak_hash: from_entry.weak_hash,
                strong_hash: from_entry.strong_hash,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::attributes::StoreAttributes;
    use coffer_core::crypto::CryptoContext;
    use coffer_core::filename::StoreFilename;

    fn crypto() -> CryptoContext {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 11 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn combine_reproduces_original_via_decode() {
        let crypto = crypto();
        let container = ObjectId::from(3);
        let filename = StoreFilename::encrypted("a.txt");
        let attrs = StoreAttributes::empty();

        let base_data: Vec<u8> = (0..60_000u32).map(|i| (i % 200) as u8).collect();
        let from_bytes =
            crate::encode::encode_fresh(&base_data, container, &filename, &attrs, 1, &crypto).unwrap();
        let from_parsed = crate::decode::parse(&from_bytes, &crypto).unwrap();

        let mut new_data = base_data.clone();
        new_data.extend_from_slice(b"appended tail bytes for the diff to pick up");

        let diff = crate::encode::encode_diff(
            &new_data,
            container,
            &filename,
            &attrs,
            2,
            &crypto,
            &from_parsed.entries,
            ObjectId::from(1),
            None,
        )
        .unwrap();

        let combined = combine_file(&diff.bytes, &from_bytes, &crypto).unwrap();
        let combined_parsed = crate::decode::parse(&combined, &crypto).unwrap();
        assert!(combined_parsed.index_header.other_file_id.is_none());
        let decoded = crate::decode::decode_to_cleartext(&combined_parsed, &crypto, |_| {
            unreachable!("combined object is complete")
        })
        .unwrap();
        assert_eq!(decoded, new_data);
    }
}
