//! Encoding a cleartext file into the file object format: fresh, and as a
//! diff against a prior object's block index.

use std::time::{Duration, Instant};

use coffer_core::attributes::StoreAttributes;
use coffer_core::crypto::{BlockCipher, CryptoContext};
use coffer_core::error::Result;
use coffer_core::filename::StoreFilename;
use coffer_core::ObjectId;

use crate::chunker::{chunk_boundaries, target_block_size};
use crate::header::{FileHeader, FileOptionFlags, Magic};
use crate::index::{write_entries_encrypted, BlockIndexEntry, IndexHeader, IndexMagic};
use crate::rolling::RollingChecksum;

/// Default cap on the matching loop in `encode_diff`: past this wall-clock
/// budget, remaining bytes are emitted as fresh blocks rather than matched
/// against the prior index. A partial diff is not a failure.
pub const DEFAULT_DIFFING_TIME_BUDGET: Duration = Duration::from_secs(180);

/// Floor for the candidate window used while matching against a prior
/// object's blocks. Independent of `target_block_size`'s 2 KiB CDC floor —
/// a file far smaller than that floor must still be able to borrow a block
/// from its own prior version.
const MIN_MATCH_WINDOW: usize = 4;

/// Derives the initial IV base for a freshly-encoded block at `block_index`
/// within `container_id`. Stored verbatim in the block's index entry, so it
/// travels with the ciphertext through combine/reverse-diff without needing
/// to be recomputed from the block's (possibly different) position in a
/// later object.
pub fn derive_iv_base(container_id: ObjectId, block_index: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&container_id.as_u64().to_be_bytes());
    hasher.update(&block_index.to_be_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest.as_bytes()[..8].try_into().unwrap())
}

/// Expands a stored `iv_base` into the byte-length IV the block cipher
/// needs.
pub fn iv_bytes_from_base(iv_base: u64, iv_len: usize) -> Vec<u8> {
    let digest = blake3::hash(&iv_base.to_be_bytes());
    digest.as_bytes()[..iv_len].to_vec()
}

fn strong_hash(cleartext: &[u8]) -> [u8; 16] {
    let digest = blake3::hash(cleartext);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest.as_bytes()[..16]);
    out
}

struct EncodedBlock {
    entry: BlockIndexEntry,
    ciphertext: Vec<u8>,
}

fn encode_block(
    cipher: &dyn BlockCipher,
    container_id: ObjectId,
    block_index: u64,
    cleartext: &[u8],
    iv_len: usize,
) -> EncodedBlock {
    let iv_base = derive_iv_base(container_id, block_index);
    let iv = iv_bytes_from_base(iv_base, iv_len);
    let ciphertext = cipher.encrypt(&iv, cleartext);
    let entry = BlockIndexEntry {
        encoded_size: ciphertext.len() as i64,
        clear_size: cleartext.len() as u64,
        iv_base,
        weak_hash: RollingChecksum::of_window(cleartext),
        strong_hash: strong_hash(cleartext),
    };
    EncodedBlock { entry, ciphertext }
}

fn assemble(
    header: FileHeader,
    name: Vec<u8>,
    attrs: Vec<u8>,
    payload: Vec<u8>,
    other_file_id: ObjectId,
    entries: &[BlockIndexEntry],
    entry_cipher: &dyn BlockCipher,
    entry_iv: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    header.write(&mut out)?;
    out.extend_from_slice(&name);
    out.extend_from_slice(&attrs);
    out.extend_from_slice(&payload);
    let index_header =
        IndexHeader { magic: IndexMagic::V1, other_file_id, num_entries: entries.len() as u64 };
    index_header.write(&mut out)?;
    write_entries_encrypted(&mut out, entries, entry_cipher, entry_iv)?;
    Ok(out)
}

/// Encodes a fresh (non-diff) file object: every block is present.
pub fn encode_fresh(
    cleartext: &[u8],
    container_id: ObjectId,
    filename: &StoreFilename,
    attrs: &StoreAttributes,
    modification_time: u64,
    crypto: &CryptoContext,
) -> Result<Vec<u8>> {
    let cipher = crypto.file_block_cipher();
    let iv_len = cipher.iv_len();
    let target = target_block_size(cleartext.len() as u64);
    let chunks = chunk_boundaries(cleartext, target);

    let mut payload = Vec::new();
    let mut entries = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let block = encode_block(
            cipher.as_ref(),
            container_id,
            i as u64,
            &cleartext[chunk.start..chunk.start + chunk.len],
            iv_len,
        );
        payload.extend_from_slice(&block.ciphertext);
        entries.push(block.entry);
    }

    let name_wire = filename.write(crypto.filename_cipher().as_ref(), crypto.filename_iv())?;
    let attrs_wire = attrs.write();
    let header = FileHeader {
        magic: Magic::FileV1,
        container_id,
        modification_time,
        max_block_clear_size: target,
        options: FileOptionFlags::HAS_AES_KEY,
        num_blocks: entries.len() as u64,
    };
    assemble(
        header,
        name_wire,
        attrs_wire,
        payload,
        ObjectId::NONE,
        &entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )
}

pub struct DiffEncodeResult {
    pub bytes: Vec<u8>,
    pub is_completely_different: bool,
}

/// Encodes `cleartext` as a diff against `prior_entries`, the block index
/// trailer of an existing object `prior_object_id` on the server. Matching
/// does *not* reuse `target_block_size`'s content-defined chunk target — that
/// target floors at `chunker::MIN_BLOCK_SIZE` (2 KiB) and would never fit
/// inside a small file. Instead the candidate window at each position is
/// drawn from the exact `clear_size` of each prior entry: a weak-hash hit for
/// that entry's own length, confirmed by strong hash, emits a borrow instead
/// of a fresh block. Sizes are tried longest-first so a long match is
/// preferred over a short one that happens to start at the same position.
pub fn encode_diff(
    cleartext: &[u8],
    container_id: ObjectId,
    filename: &StoreFilename,
    attrs: &StoreAttributes,
    modification_time: u64,
    crypto: &CryptoContext,
    prior_entries: &[BlockIndexEntry],
    prior_object_id: ObjectId,
    diffing_time_budget: Option<Duration>,
) -> Result<DiffEncodeResult> {
    let cipher = crypto.file_block_cipher();
    let iv_len = cipher.iv_len();
    let fresh_target = target_block_size(cleartext.len() as u64);
    let budget = diffing_time_budget.unwrap_or(DEFAULT_DIFFING_TIME_BUDGET);
    let deadline = Instant::now() + budget;

    let mut lookup: std::collections::HashMap<(u32, u64), Vec<(usize, [u8; 16])>> =
        std::collections::HashMap::new();
    for (ordinal, entry) in prior_entries.iter().enumerate() {
        lookup
            .entry((entry.weak_hash, entry.clear_size))
            .or_default()
            .push((ordinal, entry.strong_hash));
    }

    let mut candidate_sizes: Vec<u64> = prior_entries
        .iter()
        .map(|e| e.clear_size)
        .filter(|&size| size >= MIN_MATCH_WINDOW as u64)
        .collect();
    candidate_sizes.sort_unstable();
    candidate_sizes.dedup();
    candidate_sizes.reverse();

    let mut payload = Vec::new();
    let mut entries = Vec::new();
    let mut any_borrow = false;
    let mut pending_start = 0usize;
    let mut pos = 0usize;
    let mut block_index = 0u64;
    let mut budget_exhausted = false;

    let mut flush_fresh_span = |start: usize, end: usize, payload: &mut Vec<u8>, entries: &mut Vec<BlockIndexEntry>, block_index: &mut u64| {
        if start >= end {
            return;
        }
        for chunk in chunk_boundaries(&cleartext[start..end], fresh_target) {
            let block = encode_block(
                cipher.as_ref(),
                container_id,
                *block_index,
                &cleartext[start + chunk.start..start + chunk.start + chunk.len],
                iv_len,
            );
            payload.extend_from_slice(&block.ciphertext);
            entries.push(block.entry);
            *block_index += 1;
        }
    };

    while pos < cleartext.len() {
        if !budget_exhausted && Instant::now() >= deadline {
            budget_exhausted = true;
        }
        if budget_exhausted {
            break;
        }
        let remaining = cleartext.len() - pos;
        let mut matched: Option<(usize, u64)> = None;
        for &size in &candidate_sizes {
            if size as usize > remaining {
                continue;
            }
            let candidate = &cleartext[pos..pos + size as usize];
            let weak = RollingChecksum::of_window(candidate);
            if let Some(candidates) = lookup.get(&(weak, size)) {
                let strong = strong_hash(candidate);
                if let Some(&(ordinal, _)) =
                    candidates.iter().find(|&&(_, stored_strong)| stored_strong == strong)
                {
                    matched = Some((ordinal, size));
                    break;
                }
            }
        }
        match matched {
            Some((ordinal, size)) => {
                flush_fresh_span(pending_start, pos, &mut payload, &mut entries, &mut block_index);
                let candidate = &cleartext[pos..pos + size as usize];
                entries.push(BlockIndexEntry {
                    encoded_size: -((ordinal as i64) + 1),
                    clear_size: size,
                    iv_base: 0,
                    weak_hash: RollingChecksum::of_window(candidate),
                    strong_hash: strong_hash(candidate),
                });
                block_index += 1;
                any_borrow = true;
                pos += size as usize;
                pending_start = pos;
            }
            None => {
                pos += 1;
            }
        }
    }
    let tail_end = cleartext.len();
    flush_fresh_span(pending_start, tail_end, &mut payload, &mut entries, &mut block_index);

    let name_wire = filename.write(crypto.filename_cipher().as_ref(), crypto.filename_iv())?;
    let attrs_wire = attrs.write();
    let header = FileHeader {
        magic: Magic::FileV1,
        container_id,
        modification_time,
        max_block_clear_size: fresh_target,
        options: FileOptionFlags::HAS_AES_KEY,
        num_blocks: entries.len() as u64,
    };
    let bytes = assemble(
        header,
        name_wire,
        attrs_wire,
        payload,
        prior_object_id,
        &entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )?;
    Ok(DiffEncodeResult { bytes, is_completely_different: !any_borrow })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher_ctx_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        buf
    }

    #[test]
    fn encode_fresh_produces_all_positive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        std::fs::write(&key_path, test_cipher_ctx_bytes()).unwrap();
        let crypto = CryptoContext::load(&key_path).unwrap();

        let data = vec![42u8; 50_000];
        let filename = StoreFilename::encrypted("report.pdf");
        let attrs = StoreAttributes::empty();
        let bytes =
            encode_fresh(&data, ObjectId::from(5), &filename, &attrs, 1_700_000_000, &crypto).unwrap();
        assert!(!bytes.is_empty());
    }

    /// "hello" -> "hello world": the appended file must borrow the original
    /// five bytes rather than falling back to a complete fresh upload.
    #[test]
    fn small_file_diff_borrows_unchanged_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        std::fs::write(&key_path, test_cipher_ctx_bytes()).unwrap();
        let crypto = CryptoContext::load(&key_path).unwrap();

        let filename = StoreFilename::encrypted("greeting.txt");
        let attrs = StoreAttributes::empty();
        let prior_bytes =
            encode_fresh(b"hello", ObjectId::from(1), &filename, &attrs, 1, &crypto).unwrap();
        let prior_parsed = crate::decode::parse(&prior_bytes, &crypto).unwrap();

        let diff = encode_diff(
            b"hello world",
            ObjectId::from(2),
            &filename,
            &attrs,
            2,
            &crypto,
            &prior_parsed.entries,
            ObjectId::from(1),
            None,
        )
        .unwrap();

        assert!(!diff.is_completely_different);
        let parsed = crate::decode::parse(&diff.bytes, &crypto).unwrap();
        assert!(parsed.entries.iter().any(|e| !e.is_present()));
    }
}
