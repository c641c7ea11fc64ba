//! Reverse-diffing: given a diff `D = newfile ∘ F` and its base
//! `F`, produce `D'` such that `D' ∘ newfile == F`. Used by housekeeping
//! when the newer object in a chain is being pruned but the older object
//! must remain retrievable — the old object is re-expressed as a diff
//! against the object that's about to become the new head of the chain.

use std::collections::HashMap;

use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

use crate::combine::{self};
use crate::index::{write_entries_encrypted, BlockIndexEntry, IndexHeader, IndexMagic};

pub struct ReverseDiffResult {
    pub bytes: Vec<u8>,
    pub is_completely_different: bool,
}

/// `diff_bytes` is `D` (`newfile ∘ F`), `from_bytes` is `F`, and
/// `newfile_object_id` is the id `D' `'s entries will borrow against once
/// `newfile` takes over as the chain's diff base.
pub fn reverse_diff(
    diff_bytes: &[u8],
    from_bytes: &[u8],
    newfile_object_id: ObjectId,
    crypto: &CryptoContext,
) -> Result<ReverseDiffResult> {
    let diff = combine::parse_trailer(diff_bytes, crypto)?;
    let from = combine::parse_trailer(from_bytes, crypto)?;

    // Which of D's entries (by ordinal) borrows each of F's blocks: those
    // blocks are already present in `newfile` and D' can borrow them back.
    let mut borrowed_by: HashMap<usize, usize> = HashMap::new();
    for (ordinal, entry) in diff.entries.iter().enumerate() {
        if !entry.is_present() {
            let block_no = entry.borrowed_block_number() as usize;
            borrowed_by.entry(block_no).or_insert(ordinal);
        }
    }

    let from_positions = combine::from_position_table(&from.entries)?;
    let mut out_payload = Vec::new();
    let mut out_entries = Vec::with_capacity(from.entries.len());

    for block_no in 1..=from.entries.len() {
        if let Some(&ordinal) = borrowed_by.get(&block_no) {
            let from_entry = from.entries[block_no - 1];
            out_entries.push(BlockIndexEntry {
                encoded_size: -((ordinal as i64) + 1),
                clear_size: from_entry.clear_size,
                iv_base: from_entry.iv_base,
                weak_hash: from_entry.weak_hash,
                strong_hash: from_entry.strong_hash,
            });
        } else {
            let start = from_positions[block_no - 1];
            let end = from_positions[block_no];
            out_payload.extend_from_slice(&from.payload[start..end]);
            out_entries.push(from.entries[block_no - 1]);
        }
    }

    if from.entries.is_empty() {
        return Err(BackupError::BadBackupStoreFile(
            "reverse_diff requires a non-empty base object".into(),
        ));
    }

    let mut out = Vec::with_capacity(from.header_bytes_len + out_payload.len() + 64);
    out.extend_from_slice(&from_bytes[..from.header_bytes_len]);
    out.extend_from_slice(&out_payload);
    let out_index_header = IndexHeader {
        magic: IndexMagic::V1,
        other_file_id: newfile_object_id,
        num_entries: out_entries.len() as u64,
    };
    out_index_header.write(&mut out)?;
    write_entries_encrypted(
        &mut out,
        &out_entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )?;

    // "Completely different" here means every block of F had to be
    // re-embedded — none of it survived into `newfile` by reference, so
    // D' carries no borrows at all.
    let is_completely_different = out_entries.iter().all(|e| e.is_present());
    Ok(ReverseDiffResult { bytes: out, is_completely_different })
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
            *b = (i * 13 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn reverse_then_combine_with_newfile_reproduces_from() {
        let crypto = crypto();
        let container = ObjectId::from(4);
        let filename = StoreFilename::encrypted("b.txt");
        let attrs = StoreAttributes::empty();

        let from_data: Vec<u8> = (0..40_000u32).map(|i| (i % 177) as u8).collect();
        let from_bytes =
            crate::encode::encode_fresh(&from_data, container, &filename, &attrs, 1, &crypto).unwrap();
        let from_parsed = crate::decode::parse(&from_bytes, &crypto).unwrap();

        let mut new_data = from_data.clone();
        new_data.truncate(30_000);
        new_data.extend_from_slice(b"brand new tail content");

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

        let newfile_bytes = combine::combine_file(&diff.bytes, &from_bytes, &crypto).unwrap();
        let reversed = reverse_diff(&diff.bytes, &from_bytes, ObjectId::from(2), &crypto).unwrap();

        let recombined = combine::combine_file(&reversed.bytes, &newfile_bytes, &crypto).unwrap();
        let recombined_parsed = crate::decode::parse(&recombined, &crypto).unwrap();
        let decoded = crate::decode::decode_to_cleartext(&recombined_parsed, &crypto, |_| {
            unreachable!("recombined object is complete")
        })
        .unwrap();
        assert_eq!(decoded, from_data);
    }
}
