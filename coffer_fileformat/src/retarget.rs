//! Retargeting a diff object's `other_file_id` in place, needed by
//! `coffer_housekeeping`'s chain-collapse cascade: when a base object is
//! re-stored under a new
//! object-id with byte-identical cleartext, every diff that pointed at the
//! old id needs its trailer's `other_file_id` updated to the new one. No
//! block payload changes — block ordinals in the renamed object are
//! unchanged, since its content is byte-for-byte identical.

use coffer_core::crypto::CryptoContext;
use coffer_core::error::Result;
use coffer_core::ObjectId;

use crate::combine::parse_trailer;
use crate::index::{write_entries_encrypted, IndexHeader, IndexMagic};

pub fn retarget_other_file_id(
    bytes: &[u8],
    new_other_file_id: ObjectId,
    crypto: &CryptoContext,
) -> Result<Vec<u8>> {
    let parsed = parse_trailer(bytes, crypto)?;
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..parsed.header_bytes_len]);
    out.extend_from_slice(&parsed.payload);
    let index_header = IndexHeader {
        magic: IndexMagic::V1,
        other_file_id: new_other_file_id,
        num_entries: parsed.entries.len() as u64,
    };
    index_header.write(&mut out)?;
    write_entries_encrypted(
        &mut out,
        &parsed.entries,
        crypto.file_block_entry_cipher().as_ref(),
        crypto.filename_iv(),
    )?;
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
            *b = (i * 19 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn retarget_changes_only_the_other_file_id() {
        let crypto = crypto();
        let container = ObjectId::from(1);
        let filename = StoreFilename::encrypted("c.txt");
        let attrs = StoreAttributes::empty();
        let base_data: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        let base_bytes =
            crate::encode::encode_fresh(&base_data, container, &filename, &attrs, 1, &crypto).unwrap();
        let base_parsed = crate::decode::parse(&base_bytes, &crypto).unwrap();

        let mut new_data = base_data.clone();
        new_data.extend_from_slice(b"tail");
        let diff = crate::encode::encode_diff(
            &new_data, container, &filename, &attrs, 2, &crypto,
            &base_parsed.entries, ObjectId::from(5), None,
        ).unwrap();

        let retargeted = retarget_other_file_id(&diff.bytes, ObjectId::from(77), &crypto).unwrap();
        let retargeted_parsed = crate::decode::parse(&retargeted, &crypto).unwrap();
        assert_eq!(retargeted_parsed.index_header.other_file_id, ObjectId::from(77));

        let diff_parsed = crate::decode::parse(&diff.bytes, &crypto).unwrap();
        assert_eq!(retargeted_parsed.entries, diff_parsed.entries);
    }
}
