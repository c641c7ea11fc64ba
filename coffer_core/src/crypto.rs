//! Key loading and the pluggable block-cipher contract.
//!
//! Keys are loaded once, at client start, from a single key-material file
//! whose bytes are partitioned by fixed offsets (see [`KEY_MATERIAL_LEN`]
//! and the `*_OFFSET`/`*_LEN` constants below). [`CryptoContext::load`]
//! wipes the source buffer as soon as the sub-keys have been copied out,
//! and zeroizes its own key bytes on drop.

use std::path::Path;

use aes::Aes256;
use blowfish::Blowfish;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cipher::block_padding::Pkcs7;
use zeroize::Zeroize;

use crate::error::{BackupError, Result};

pub const FILENAME_KEY_LEN: usize = 16;
pub const FILENAME_IV_LEN: usize = 8;
pub const ATTRIBUTE_KEY_LEN: usize = 16;
pub const FILE_BLOCK_ENTRY_KEY_LEN: usize = 16;
pub const ATTRIBUTE_HASH_SECRET_LEN: usize = 16;
pub const AES_KEY_LEN: usize = 32;

const FILENAME_KEY_OFFSET: usize = 0;
const FILENAME_IV_OFFSET: usize = FILENAME_KEY_OFFSET + FILENAME_KEY_LEN;
const ATTRIBUTE_KEY_OFFSET: usize = FILENAME_IV_OFFSET + FILENAME_IV_LEN;
const FILE_BLOCK_ENTRY_KEY_OFFSET: usize = ATTRIBUTE_KEY_OFFSET + ATTRIBUTE_KEY_LEN;
const ATTRIBUTE_HASH_SECRET_OFFSET: usize = FILE_BLOCK_ENTRY_KEY_OFFSET + FILE_BLOCK_ENTRY_KEY_LEN;
const AES_KEY_OFFSET: usize = ATTRIBUTE_HASH_SECRET_OFFSET + ATTRIBUTE_HASH_SECRET_LEN;

/// Minimum key-material file length: every fixed-offset sub-key up to and
/// including the attribute-hash secret. The trailing AES key is optional —
/// older key files (and V0-only clients) omit it, and file-block encryption
/// falls back to the attribute key's Blowfish cipher.
pub const KEY_MATERIAL_LEN: usize = ATTRIBUTE_HASH_SECRET_OFFSET + ATTRIBUTE_HASH_SECRET_LEN;
pub const KEY_MATERIAL_LEN_WITH_AES: usize = AES_KEY_OFFSET + AES_KEY_LEN;

/// The loaded, ready-to-use keys for one account. Zeroized on drop.
pub struct CryptoContext {
    filename_key: [u8; FILENAME_KEY_LEN],
    filename_iv: [u8; FILENAME_IV_LEN],
    attribute_key: [u8; ATTRIBUTE_KEY_LEN],
    file_block_entry_key: [u8; FILE_BLOCK_ENTRY_KEY_LEN],
    attribute_hash_secret: [u8; ATTRIBUTE_HASH_SECRET_LEN],
    aes_key: Option<[u8; AES_KEY_LEN]>,
}

impl CryptoContext {
    /// Loads key material from `path`, partitions it by the fixed offsets
    /// above, and wipes the intermediate buffer before returning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut buf = std::fs::read(path.as_ref())
            .map_err(|e| BackupError::CouldntLoadClientKeyMaterial(e.to_string()))?;
        let ctx = Self::from_buffer(&buf)?;
        buf.zeroize();
        Ok(ctx)
    }

    fn from_buffer(buf: &[u8]) -> Result<Self> {
        if buf.len() < KEY_MATERIAL_LEN {
            return Err(BackupError::CouldntLoadClientKeyMaterial(format!(
                "key material file is {} bytes, need at least {}",
                buf.len(),
                KEY_MATERIAL_LEN
            )));
        }
        let mut filename_key = [0u8; FILENAME_KEY_LEN];
        filename_key.copy_from_slice(&buf[FILENAME_KEY_OFFSET..FILENAME_KEY_OFFSET + FILENAME_KEY_LEN]);
        let mut filename_iv = [0u8; FILENAME_IV_LEN];
        filename_iv.copy_from_slice(&buf[FILENAME_IV_OFFSET..FILENAME_IV_OFFSET + FILENAME_IV_LEN]);
        let mut attribute_key = [0u8; ATTRIBUTE_KEY_LEN];
        attribute_key.copy_from_slice(&buf[ATTRIBUTE_KEY_OFFSET..ATTRIBUTE_KEY_OFFSET + ATTRIBUTE_KEY_LEN]);
        let mut file_block_entry_key = [0u8; FILE_BLOCK_ENTRY_KEY_LEN];
        file_block_entry_key.copy_from_slice(
            &buf[FILE_BLOCK_ENTRY_KEY_OFFSET..FILE_BLOCK_ENTRY_KEY_OFFSET + FILE_BLOCK_ENTRY_KEY_LEN],
        );
        let mut attribute_hash_secret = [0u8; ATTRIBUTE_HASH_SECRET_LEN];
        attribute_hash_secret.copy_from_slice(
            &buf[ATTRIBUTE_HASH_SECRET_OFFSET..ATTRIBUTE_HASH_SECRET_OFFSET + ATTRIBUTE_HASH_SECRET_LEN],
        );
        let aes_key = if buf.len() >= KEY_MATERIAL_LEN_WITH_AES {
            let mut k = [0u8; AES_KEY_LEN];
            k.copy_from_slice(&buf[AES_KEY_OFFSET..AES_KEY_OFFSET + AES_KEY_LEN]);
            Some(k)
        } else {
            None
        };
        Ok(Self {
            filename_key,
            filename_iv,
            attribute_key,
            file_block_entry_key,
            attribute_hash_secret,
            aes_key,
        })
    }

    pub fn filename_key(&self) -> &[u8; FILENAME_KEY_LEN] {
        &self.filename_key
    }

    pub fn filename_iv(&self) -> &[u8; FILENAME_IV_LEN] {
        &self.filename_iv
    }

    pub fn attribute_key(&self) -> &[u8; ATTRIBUTE_KEY_LEN] {
        &self.attribute_key
    }

    pub fn file_block_entry_key(&self) -> &[u8; FILE_BLOCK_ENTRY_KEY_LEN] {
        &self.file_block_entry_key
    }

    pub fn attribute_hash_secret(&self) -> &[u8; ATTRIBUTE_HASH_SECRET_LEN] {
        &self.attribute_hash_secret
    }

    /// The high-strength file-block cipher to use for new (V1) objects.
    /// Falls back to the Blowfish attribute key when no AES key was loaded,
    /// matching old key-material files. Only ever used for the payload
    /// blocks of a file object, never for names or attributes — those have
    /// their own dedicated ciphers below.
    pub fn file_block_cipher(&self) -> Box<dyn BlockCipher> {
        match self.aes_key {
            Some(key) => Box::new(AesCbcCipher { key }),
            None => Box::new(BlowfishCbcCipher {
                key: self.attribute_key.to_vec(),
            }),
        }
    }

    /// The legacy (V0) Blowfish cipher, for reading objects written by old
    /// clients. Decrypt-only in practice, since V0 is never produced.
    pub fn legacy_block_cipher(&self) -> Box<dyn BlockCipher> {
        Box::new(BlowfishCbcCipher {
            key: self.attribute_key.to_vec(),
        })
    }

    /// The dedicated filename cipher: Blowfish keyed by `filename_key`, used
    /// with [`Self::filename_iv`]. Never the file-block cipher — a filename
    /// is encrypted once, in place, and must not share a key with payload
    /// blocks the server is allowed to see the ciphertext length of.
    pub fn filename_cipher(&self) -> Box<dyn BlockCipher> {
        Box::new(BlowfishCbcCipher {
            key: self.filename_key.to_vec(),
        })
    }

    /// The dedicated attribute cipher: Blowfish keyed by `attribute_key`,
    /// used with [`Self::filename_iv`] (Blowfish's 8-byte block size is
    /// fixed regardless of which key drives it, so the filename and
    /// attribute ciphers share an IV without sharing a key).
    pub fn attribute_cipher(&self) -> Box<dyn BlockCipher> {
        Box::new(BlowfishCbcCipher {
            key: self.attribute_key.to_vec(),
        })
    }

    /// The dedicated cipher for a file object's block-index trailer: keyed
    /// by `file_block_entry_key`, independent of the payload cipher, so the
    /// per-block `weak_hash`/`strong_hash`/`encoded_size` never reach the
    /// object store in the clear.
    pub fn file_block_entry_cipher(&self) -> Box<dyn BlockCipher> {
        Box::new(BlowfishCbcCipher {
            key: self.file_block_entry_key.to_vec(),
        })
    }

    /// Keyed 64-bit digest used for attribute-change detection without
    /// decrypting the attribute blob. `(secret, filename, stat-tuple)` is
    /// hashed with BLAKE3 and truncated to its low 8 bytes.
    pub fn attribute_hash(&self, filename: &[u8], stat_tuple: &[u8]) -> u64 {
        let mut hasher = blake3::Hasher::new_keyed(&expand_secret(&self.attribute_hash_secret));
        hasher.update(filename);
        hasher.update(stat_tuple);
        let digest = hasher.finalize();
        u64::from_be_bytes(digest.as_bytes()[0..8].try_into().unwrap())
    }
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        self.filename_key.zeroize();
        self.filename_iv.zeroize();
        self.attribute_key.zeroize();
        self.file_block_entry_key.zeroize();
        self.attribute_hash_secret.zeroize();
        if let Some(k) = &mut self.aes_key {
            k.zeroize();
        }
    }
}

fn expand_secret(secret: &[u8; ATTRIBUTE_HASH_SECRET_LEN]) -> [u8; 32] {
    blake3::hash(secret).into()
}

/// The cross-field encrypt/decrypt contract every codec goes through.
/// Ciphertext carries no authentication tag: callers are responsible for
/// structural validation (magic numbers, lengths) rather than relying on
/// AEAD failure to detect corruption — matching the legacy wire format.
pub trait BlockCipher: Send + Sync {
    fn encrypt(&self, iv: &[u8], cleartext: &[u8]) -> Vec<u8>;
    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
    /// The IV length this cipher requires (its block size). Callers must
    /// size the IV they derive to this, not assume a fixed length across
    /// cipher kinds — AES-CBC and Blowfish-CBC block sizes differ.
    fn iv_len(&self) -> usize;
}

pub struct AesCbcCipher {
    pub(crate) key: [u8; AES_KEY_LEN],
}

impl BlockCipher for AesCbcCipher {
    fn encrypt(&self, iv: &[u8], cleartext: &[u8]) -> Vec<u8> {
        type Enc = cbc::Encryptor<Aes256>;
        let enc = Enc::new(self.key.as_slice().into(), iv.into());
        enc.encrypt_padded_vec_mut::<Pkcs7>(cleartext)
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        type Dec = cbc::Decryptor<Aes256>;
        let dec = Dec::new(self.key.as_slice().into(), iv.into());
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| BackupError::BadBackupStoreFile("AES-CBC padding invalid".into()))
    }

    fn iv_len(&self) -> usize {
        16
    }
}

pub struct BlowfishCbcCipher {
    pub(crate) key: Vec<u8>,
}

impl BlockCipher for BlowfishCbcCipher {
    fn encrypt(&self, iv: &[u8], cleartext: &[u8]) -> Vec<u8> {
        type Enc = cbc::Encryptor<Blowfish>;
        let enc = Enc::new_from_slices(&self.key, iv).expect("valid blowfish key/iv length");
        enc.encrypt_padded_vec_mut::<Pkcs7>(cleartext)
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        type Dec = cbc::Decryptor<Blowfish>;
        let dec = Dec::new_from_slices(&self.key, iv).expect("valid blowfish key/iv length");
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| BackupError::BadBackupStoreFile("Blowfish-CBC padding invalid".into()))
    }

    fn iv_len(&self) -> usize {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key_material() -> Vec<u8> {
        let mut buf = vec![0u8; KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        buf
    }

    #[test]
    fn loads_and_partitions_key_material() {
        let buf = sample_key_material();
        let ctx = CryptoContext::from_buffer(&buf).unwrap();
        assert_eq!(ctx.filename_key(), &buf[0..16].try_into().unwrap() as &[u8; 16]);
        assert!(ctx.aes_key.is_some());
    }

    #[test]
    fn rejects_short_key_material() {
        let buf = vec![0u8; KEY_MATERIAL_LEN - 1];
        assert!(CryptoContext::from_buffer(&buf).is_err());
    }

    #[test]
    fn aes_roundtrip() {
        let cipher = AesCbcCipher { key: [7u8; AES_KEY_LEN] };
        let iv = [1u8; 16];
        let pt = b"the quick brown fox jumps".to_vec();
        let ct = cipher.encrypt(&iv, &pt);
        let back = cipher.decrypt(&iv, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn file_block_cipher_from_aes_bearing_context_round_trips_with_its_own_iv_len() {
        let buf = sample_key_material();
        let ctx = CryptoContext::from_buffer(&buf).unwrap();
        let cipher = ctx.file_block_cipher();
        let iv = vec![3u8; cipher.iv_len()];
        let pt = b"round trip through the real AES path".to_vec();
        let ct = cipher.encrypt(&iv, &pt);
        assert_eq!(cipher.decrypt(&iv, &ct).unwrap(), pt);
    }

    #[test]
    fn filename_and_attribute_ciphers_use_distinct_keys_from_file_block_cipher() {
        let buf = sample_key_material();
        let ctx = CryptoContext::from_buffer(&buf).unwrap();
        let iv = *ctx.filename_iv();
        let pt = b"some-filename.txt".to_vec();

        let name_cipher = ctx.filename_cipher();
        let attr_cipher = ctx.attribute_cipher();
        assert_eq!(name_cipher.iv_len(), 8);
        assert_eq!(attr_cipher.iv_len(), 8);

        let ct_by_name_key = name_cipher.encrypt(&iv, &pt);
        let ct_by_attr_key = attr_cipher.encrypt(&iv, &pt);
        assert_ne!(ct_by_name_key, ct_by_attr_key, "filename_key and attribute_key must differ");
        assert_eq!(name_cipher.decrypt(&iv, &ct_by_name_key).unwrap(), pt);
        assert_eq!(attr_cipher.decrypt(&iv, &ct_by_attr_key).unwrap(), pt);
    }

    #[test]
    fn attribute_hash_is_stable() {
        let buf = sample_key_material();
        let ctx = CryptoContext::from_buffer(&buf).unwrap();
        let a = ctx.attribute_hash(b"foo.txt", b"stat-tuple-bytes");
        let b = ctx.attribute_hash(b"foo.txt", b"stat-tuple-bytes");
        assert_eq!(a, b);
        let c = ctx.attribute_hash(b"bar.txt", b"stat-tuple-bytes");
        assert_ne!(a, c);
    }
}
