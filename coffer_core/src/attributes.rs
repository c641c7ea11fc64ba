//! The attribute codec: a length-prefixed, encrypted, opaque byte
//! block, with an in-memory cache of the decrypted cleartext so repeated
//! reads within one session don't re-run the cipher.

use std::cell::RefCell;

use crate::crypto::BlockCipher;
use crate::error::Result;

/// Encrypted attributes plus their accompanying keyed hash (see
/// `CryptoContext::attribute_hash`). `SetAttributes` replaces both fields
/// together — they are never updated independently.
pub struct StoreAttributes {
    ciphertext: Vec<u8>,
    hash: u64,
    cleartext_cache: RefCell<Option<Vec<u8>>>,
}

impl StoreAttributes {
    pub fn empty() -> Self {
        Self { ciphertext: Vec::new(), hash: 0, cleartext_cache: RefCell::new(Some(Vec::new())) }
    }

    pub fn from_ciphertext(ciphertext: Vec<u8>, hash: u64) -> Self {
        Self { ciphertext, hash, cleartext_cache: RefCell::new(None) }
    }

    /// `true` iff the encrypted block is non-empty.
    pub fn has_attributes(&self) -> bool {
        !self.ciphertext.is_empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Decrypts on first access, then serves the cached cleartext.
    pub fn cleartext(&self, cipher: &dyn BlockCipher, iv: &[u8]) -> Result<Vec<u8>> {
        if let Some(cached) = self.cleartext_cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let cleartext = cipher.decrypt(iv, &self.ciphertext)?;
        *self.cleartext_cache.borrow_mut() = Some(cleartext.clone());
        Ok(cleartext)
    }

    /// Replaces both the ciphertext and the attribute hash, and invalidates
    /// the cleartext cache.
    pub fn set_attributes(&mut self, cleartext: &[u8], cipher: &dyn BlockCipher, iv: &[u8], hash: u64) {
        self.ciphertext = cipher.encrypt(iv, cleartext);
        self.hash = hash;
        *self.cleartext_cache.borrow_mut() = Some(cleartext.to_vec());
    }

    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.ciphertext.len());
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn read(bytes: &[u8], hash: u64) -> Result<(Self, usize)> {
        use crate::error::BackupError;
        if bytes.len() < 4 {
            return Err(BackupError::PartialRead { expected: 4, got: bytes.len() });
        }
        let len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + len {
            return Err(BackupError::PartialRead { expected: 4 + len, got: bytes.len() });
        }
        let ciphertext = bytes[4..4 + len].to_vec();
        Ok((Self::from_ciphertext(ciphertext, hash), 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BlowfishCbcCipher;

    #[test]
    fn empty_has_no_attributes() {
        assert!(!StoreAttributes::empty().has_attributes());
    }

    #[test]
    fn set_then_read_back_caches_cleartext() {
        let cipher = BlowfishCbcCipher { key: vec![1u8; 16] };
        let iv = [0u8; 8];
        let mut attrs = StoreAttributes::empty();
        attrs.set_attributes(b"mode=0644;owner=1000", &cipher, &iv, 42);
        assert!(attrs.has_attributes());
        assert_eq!(attrs.hash(), 42);
        let wire = attrs.write();
        let (decoded, consumed) = StoreAttributes::read(&wire, 42).unwrap();
        assert_eq!(consumed, wire.len());
        let cleartext = decoded.cleartext(&cipher, &iv).unwrap();
        assert_eq!(cleartext, b"mode=0644;owner=1000");
    }
}
