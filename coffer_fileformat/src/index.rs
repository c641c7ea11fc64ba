//! The block-index trailer: an index header followed by N block-index
//! entries, each carrying the central sign-rule field (`encoded_size`), a
//! content-derived IV base, and a rolling/strong hash pair for matching.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::crypto::BlockCipher;
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

const MAGIC_INDEX_V0: u32 = 0x6eeb_0901;
const MAGIC_INDEX_V1: u32 = 0x6eeb_0902;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMagic {
    V0,
    V1,
}

impl IndexMagic {
    fn to_u32(self) -> u32 {
        match self {
            IndexMagic::V0 => MAGIC_INDEX_V0,
            IndexMagic::V1 => MAGIC_INDEX_V1,
        }
    }

    fn from_u32(v: u32) -> Result<Self> {
        match v {
            MAGIC_INDEX_V0 => Ok(IndexMagic::V0),
            MAGIC_INDEX_V1 => Ok(IndexMagic::V1),
            _ => Err(BackupError::BadMagic),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexHeader {
    pub magic: IndexMagic,
    /// The object this file is a diff against. `ObjectId::NONE` for a
    /// complete object.
    pub other_file_id: ObjectId,
    pub num_entries: u64,
}

impl IndexHeader {
    pub const WIRE_LEN: usize = 4 + 8 + 8;

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.magic.to_u32())?;
        out.write_u64::<BigEndian>(self.other_file_id.as_u64())?;
        out.write_u64::<BigEndian>(self.num_entries)?;
        Ok(())
    }

    pub fn read(mut bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(BackupError::PartialRead { expected: Self::WIRE_LEN, got: bytes.len() });
        }
        let magic = IndexMagic::from_u32(bytes.read_u32::<BigEndian>()?)?;
        let other_file_id = ObjectId::from(bytes.read_u64::<BigEndian>()?);
        let num_entries = bytes.read_u64::<BigEndian>()?;
        Ok((Self { magic, other_file_id, num_entries }, Self::WIRE_LEN))
    }
}

/// One block-index entry. `encoded_size > 0` means the block is *present*
/// in this object's payload region with that many ciphertext bytes;
/// `encoded_size <= 0` means the block is *borrowed* from the prior object
/// named by the trailer's `other_file_id`, and `-encoded_size` is the
/// 1-indexed block number there. `clear_size` is the block's cleartext
/// length, carried alongside `encoded_size` (its ciphertext length) so a
/// diff's matching pass knows exactly how many bytes of candidate content
/// to hash against this entry without needing to guess from padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub encoded_size: i64,
    pub clear_size: u64,
    pub iv_base: u64,
    pub weak_hash: u32,
    pub strong_hash: [u8; 16],
}

impl BlockIndexEntry {
    pub const WIRE_LEN: usize = 8 + 8 + 8 + 4 + 16;

    /// `true` iff this entry's block lives in this object's own payload.
    pub fn is_present(&self) -> bool {
        self.encoded_size > 0
    }

    /// The 1-indexed block number in the prior object this entry borrows
    /// from. Panics if `is_present()` — callers must check first.
    pub fn borrowed_block_number(&self) -> u64 {
        debug_assert!(!self.is_present());
        (-self.encoded_size) as u64
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_i64::<BigEndian>(self.encoded_size)?;
        out.write_u64::<BigEndian>(self.clear_size)?;
        out.write_u64::<BigEndian>(self.iv_base)?;
        out.write_u32::<BigEndian>(self.weak_hash)?;
        out.extend_from_slice(&self.strong_hash);
        Ok(())
    }

    pub fn read(mut bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(BackupError::PartialRead { expected: Self::WIRE_LEN, got: bytes.len() });
        }
        let encoded_size = bytes.read_i64::<BigEndian>()?;
        let clear_size = bytes.read_u64::<BigEndian>()?;
        let iv_base = bytes.read_u64::<BigEndian>()?;
        let weak_hash = bytes.read_u32::<BigEndian>()?;
        let mut strong_hash = [0u8; 16];
        strong_hash.copy_from_slice(&bytes[0..16]);
        Ok((Self { encoded_size, clear_size, iv_base, weak_hash, strong_hash }, Self::WIRE_LEN))
    }
}

/// Reads `count` entries from `bytes` in the clear, returning them plus the
/// number of bytes consumed. Used for the client's local on-disk index
/// cache, which never leaves the machine; the object trailer that actually
/// crosses the wire goes through [`read_entries_encrypted`] instead.
pub fn read_entries(bytes: &[u8], count: u64) -> Result<(Vec<BlockIndexEntry>, usize)> {
    let mut entries = Vec::with_capacity(count as usize);
    let mut offset = 0;
    for _ in 0..count {
        let (entry, consumed) = BlockIndexEntry::read(&bytes[offset..])?;
        entries.push(entry);
        offset += consumed;
    }
    Ok((entries, offset))
}

pub fn write_entries(out: &mut Vec<u8>, entries: &[BlockIndexEntry]) -> Result<()> {
    for e in entries {
        e.write(out)?;
    }
    Ok(())
}

/// Byte length of `count` entries once encrypted by [`write_entries_encrypted`]
/// with `cipher`: the clear concatenation padded up to `cipher`'s block
/// size by PKCS7 (always a full extra block when already a multiple).
pub fn encrypted_entries_len(count: u64, cipher: &dyn BlockCipher) -> usize {
    let clear_len = count as usize * BlockIndexEntry::WIRE_LEN;
    let block = cipher.iv_len();
    let pad = block - (clear_len % block);
    clear_len + pad
}

/// Encrypts the whole block-index trailer as one ciphertext with `cipher`
/// (the account's [`coffer_core::crypto::CryptoContext::file_block_entry_cipher`]),
/// so the stored object never reveals a block's `weak_hash`/`strong_hash`/
/// `encoded_size` to anyone without that key.
pub fn write_entries_encrypted(
    out: &mut Vec<u8>,
    entries: &[BlockIndexEntry],
    cipher: &dyn BlockCipher,
    iv: &[u8],
) -> Result<()> {
    let mut clear = Vec::with_capacity(entries.len() * BlockIndexEntry::WIRE_LEN);
    write_entries(&mut clear, entries)?;
    out.extend_from_slice(&cipher.encrypt(iv, &clear));
    Ok(())
}

/// Inverse of [`write_entries_encrypted`]. Returns the decoded entries plus
/// the number of ciphertext bytes consumed.
pub fn read_entries_encrypted(
    bytes: &[u8],
    count: u64,
    cipher: &dyn BlockCipher,
    iv: &[u8],
) -> Result<(Vec<BlockIndexEntry>, usize)> {
    let ciphertext_len = encrypted_entries_len(count, cipher);
    if bytes.len() < ciphertext_len {
        return Err(BackupError::PartialRead { expected: ciphertext_len, got: bytes.len() });
    }
    let clear = cipher.decrypt(iv, &bytes[..ciphertext_len])?;
    let (entries, _) = read_entries(&clear, count)?;
    Ok((entries, ciphertext_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::crypto::CryptoContext;

    fn crypto() -> CryptoContext {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; coffer_core::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 17 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn entry_sign_rule() {
        let present =
            BlockIndexEntry { encoded_size: 128, clear_size: 120, iv_base: 1, weak_hash: 0, strong_hash: [0; 16] };
        assert!(present.is_present());
        let borrowed =
            BlockIndexEntry { encoded_size: -5, clear_size: 120, iv_base: 1, weak_hash: 0, strong_hash: [0; 16] };
        assert!(!borrowed.is_present());
        assert_eq!(borrowed.borrowed_block_number(), 5);
    }

    #[test]
    fn entries_roundtrip() {
        let entries = vec![
            BlockIndexEntry { encoded_size: 10, clear_size: 5, iv_base: 1, weak_hash: 0xdead, strong_hash: [1; 16] },
            BlockIndexEntry { encoded_size: -2, clear_size: 2048, iv_base: 2, weak_hash: 0xbeef, strong_hash: [2; 16] },
        ];
        let mut buf = Vec::new();
        write_entries(&mut buf, &entries).unwrap();
        let (decoded, consumed) = read_entries(&buf, entries.len() as u64).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, entries);
    }

    #[test]
    fn encrypted_entries_roundtrip_and_hide_hashes() {
        let crypto = crypto();
        let cipher = crypto.file_block_entry_cipher();
        let iv = crypto.filename_iv();
        let entries = vec![
            BlockIndexEntry { encoded_size: 10, clear_size: 5, iv_base: 1, weak_hash: 0xdead, strong_hash: [1; 16] },
            BlockIndexEntry { encoded_size: -2, clear_size: 2048, iv_base: 2, weak_hash: 0xbeef, strong_hash: [2; 16] },
        ];
        let mut buf = Vec::new();
        write_entries_encrypted(&mut buf, &entries, cipher.as_ref(), iv.as_slice()).unwrap();
        assert_eq!(buf.len(), encrypted_entries_len(entries.len() as u64, cipher.as_ref()));

        let mut clear = Vec::new();
        write_entries(&mut clear, &entries).unwrap();
        assert_ne!(buf[..clear.len().min(buf.len())], clear[..clear.len().min(buf.len())]);

        let (decoded, consumed) =
            read_entries_encrypted(&buf, entries.len() as u64, cipher.as_ref(), iv.as_slice()).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, entries);
    }
}
