//! Client diff state: decides whether a changed local file
//! is uploaded as a fresh object or a diff against the last object-id the
//! remote-index cache remembers for that path, then emits `is_completely_different`
//! to the caller so it can warn when a diff degenerated into effectively a
//! fresh upload.

use std::time::Duration;

use coffer_core::attributes::StoreAttributes;
use coffer_core::crypto::CryptoContext;
use coffer_core::error::Result;
use coffer_core::filename::StoreFilename;
use coffer_core::ObjectId;
use coffer_fileformat::decode::parse;
use coffer_fileformat::encode::{encode_diff, encode_fresh};

use crate::cache::CachedRemoteIndex;

/// Below this fraction of blocks borrowed from the prior object, a diff is
/// discarded in favor of a fresh upload: if the match ratio is below a
/// threshold, uploading fresh instead wins out. An object that
/// borrows almost nothing gains little from diffing and keeps the chain
/// unnecessarily anchored to its predecessor.
pub const MATCH_RATIO_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Fresh,
    Diff { prior_object_id: ObjectId },
}

pub struct UploadPlan {
    pub bytes: Vec<u8>,
    pub strategy: UploadStrategy,
    pub is_completely_different: bool,
}

/// Chooses and performs the encoding for one file upload. `cached` is
/// `None` when there is no remote-index cache entry for this path, or when
/// the caller has already determined the cached entry is stale; either
/// way the file is uploaded fresh.
pub fn plan_upload(
    cleartext: &[u8],
    container_id: ObjectId,
    filename: &StoreFilename,
    attrs: &StoreAttributes,
    modification_time: u64,
    crypto: &CryptoContext,
    cached: Option<&CachedRemoteIndex>,
    diffing_time_budget: Option<Duration>,
) -> Result<UploadPlan> {
    let Some(cached) = cached else {
        let bytes = encode_fresh(cleartext, container_id, filename, attrs, modification_time, crypto)?;
        return Ok(UploadPlan { bytes, strategy: UploadStrategy::Fresh, is_completely_different: true });
    };

    let diff = encode_diff(
        cleartext,
        container_id,
        filename,
        attrs,
        modification_time,
        crypto,
        &cached.entries,
        cached.object_id,
        diffing_time_budget,
    )?;

    if diff.is_completely_different || match_ratio(&diff.bytes, crypto)? < MATCH_RATIO_THRESHOLD {
        let bytes = encode_fresh(cleartext, container_id, filename, attrs, modification_time, crypto)?;
        return Ok(UploadPlan { bytes, strategy: UploadStrategy::Fresh, is_completely_different: true });
    }

    Ok(UploadPlan {
        bytes: diff.bytes,
        strategy: UploadStrategy::Diff { prior_object_id: cached.object_id },
        is_completely_different: false,
    })
}

/// Fraction of this diff's entries that borrow from the prior object rather
/// than carrying fresh payload.
fn match_ratio(diff_bytes: &[u8], crypto: &CryptoContext) -> Result<f64> {
    let parsed = parse(diff_bytes, crypto)?;
    if parsed.entries.is_empty() {
        return Ok(0.0);
    }
    let borrowed = parsed.entries.iter().filter(|e| !e.is_present()).count();
    Ok(borrowed as f64 / parsed.entries.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_fileformat::decode::{decode_to_cleartext, parse};

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
    fn no_cache_entry_uploads_fresh() {
        let crypto = crypto();
        let data = vec![1u8; 10_000];
        let filename = StoreFilename::encrypted("a.bin");
        let attrs = StoreAttributes::empty();
        let plan = plan_upload(&data, ObjectId::from(2), &filename, &attrs, 1, &crypto, None, None)
            .unwrap();
        assert_eq!(plan.strategy, UploadStrategy::Fresh);
        assert!(plan.is_completely_different);
    }

    #[test]
    fn mostly_unchanged_file_uploads_as_diff() {
        let crypto = crypto();
        let container = ObjectId::from(2);
        let filename = StoreFilename::encrypted("a.bin");
        let attrs = StoreAttributes::empty();

        let original: Vec<u8> = (0..60_000u32).map(|i| (i % 233) as u8).collect();
        let prior_bytes =
            encode_fresh(&original, container, &filename, &attrs, 1, &crypto).unwrap();
        let prior_parsed = parse(&prior_bytes, &crypto).unwrap();
        let cached = CachedRemoteIndex {
            object_id: ObjectId::from(10),
            cached_at: 0,
            entries: prior_parsed.entries.clone(),
        };

        let mut changed = original.clone();
        changed.truncate(changed.len() - 500);
        changed.extend_from_slice(b"a short appended tail");

        let plan = plan_upload(
            &changed, container, &filename, &attrs, 2, &crypto, Some(&cached), None,
        )
        .unwrap();
        assert_eq!(plan.strategy, UploadStrategy::Diff { prior_object_id: ObjectId::from(10) });
        assert!(!plan.is_completely_different);

        let combined = coffer_fileformat::combine::combine_file(&plan.bytes, &prior_bytes, &crypto).unwrap();
        let combined_parsed = parse(&combined, &crypto).unwrap();
        let decoded = decode_to_cleartext(&combined_parsed, &crypto, |_| {
            unreachable!("combine_file produces a complete object")
        })
        .unwrap();
        assert_eq!(decoded, changed);
    }

    #[test]
    fn completely_different_file_falls_back_to_fresh() {
        let crypto = crypto();
        let container = ObjectId::from(2);
        let filename = StoreFilename::encrypted("a.bin");
        let attrs = StoreAttributes::empty();

        let original = vec![1u8; 40_000];
        let prior_bytes =
            encode_fresh(&original, container, &filename, &attrs, 1, &crypto).unwrap();
        let prior_parsed = parse(&prior_bytes, &crypto).unwrap();
        let cached = CachedRemoteIndex {
            object_id: ObjectId::from(10),
            cached_at: 0,
            entries: prior_parsed.entries,
        };

        let unrelated: Vec<u8> = (0..40_000u32).map(|i| ((i * 97) % 256) as u8).collect();
        let plan = plan_upload(
            &unrelated, container, &filename, &attrs, 2, &crypto, Some(&cached), None,
        )
        .unwrap();
        assert_eq!(plan.strategy, UploadStrategy::Fresh);
        assert!(plan.is_completely_different);
    }
}
