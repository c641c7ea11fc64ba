//! The on-the-wire filename codec.
//!
//! A filename begins with a two-byte big-endian header packing a 14-bit
//! `size` (the whole name *including* this header) and a 2-bit `encoding`.
//! `Clear` is only ever produced by the server for server-generated names;
//! anything originating from a client must be `Blowfish`-encrypted.

use crate::crypto::BlockCipher;
use crate::error::{BackupError, Result};

const ENCODING_BITS: u16 = 0b11;
const SIZE_SHIFT: u16 = 2;
const MAX_SIZE: u16 = (1 << 14) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Clear = 1,
    Blowfish = 2,
}

impl Encoding {
    fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            1 => Ok(Encoding::Clear),
            2 => Ok(Encoding::Blowfish),
            other => Err(BackupError::InvalidBackupStoreFilename(format!(
                "unknown encoding bits {other:#04b}"
            ))),
        }
    }
}

/// A decoded filename: the cleartext bytes plus how it was encoded on the
/// wire, so a directory rewrite can preserve `Clear` names verbatim rather
/// than accidentally re-encrypting a server-generated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFilename {
    pub cleartext: Vec<u8>,
    pub encoding: Encoding,
}

impl StoreFilename {
    pub fn clear(name: impl Into<Vec<u8>>) -> Self {
        Self { cleartext: name.into(), encoding: Encoding::Clear }
    }

    pub fn encrypted(name: impl Into<Vec<u8>>) -> Self {
        Self { cleartext: name.into(), encoding: Encoding::Blowfish }
    }

    /// Encodes to wire bytes: header, then either the cleartext bytes
    /// (`Clear`) or `cipher.encrypt(iv, cleartext)` (`Blowfish`).
    pub fn write(&self, cipher: &dyn BlockCipher, iv: &[u8]) -> Result<Vec<u8>> {
        let body = match self.encoding {
            Encoding::Clear => self.cleartext.clone(),
            Encoding::Blowfish => cipher.encrypt(iv, &self.cleartext),
        };
        let total = 2 + body.len();
        if total > MAX_SIZE as usize {
            return Err(BackupError::InvalidBackupStoreFilename(format!(
                "encoded filename of {total} bytes exceeds the 14-bit size field"
            )));
        }
        let header = ((total as u16) << SIZE_SHIFT) | (self.encoding as u16 & ENCODING_BITS);
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Reads one filename from `bytes`, returning it and the number of
    /// bytes consumed.
    pub fn read(bytes: &[u8], cipher: &dyn BlockCipher, iv: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(BackupError::PartialRead { expected: 2, got: bytes.len() });
        }
        let header = u16::from_be_bytes([bytes[0], bytes[1]]);
        let size = header >> SIZE_SHIFT;
        let encoding = Encoding::from_bits(header & ENCODING_BITS)?;
        if (size as usize) < 2 {
            return Err(BackupError::InvalidBackupStoreFilename(
                "size field smaller than the header itself".into(),
            ));
        }
        if bytes.len() < size as usize {
            return Err(BackupError::PartialRead { expected: size as usize, got: bytes.len() });
        }
        let body = &bytes[2..size as usize];
        let cleartext = match encoding {
            Encoding::Clear => body.to_vec(),
            Encoding::Blowfish => cipher.decrypt(iv, body)?,
        };
        Ok((Self { cleartext, encoding }, size as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoContext;

    /// Goes through real key-derivation (including an AES-bearing key file,
    /// the common case) rather than a hand-built cipher, so these tests
    /// exercise the same `filename_cipher()`/`filename_iv()` pairing every
    /// real caller uses.
    fn crypto() -> CryptoContext {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys.bin");
        let mut buf = vec![0u8; crate::crypto::KEY_MATERIAL_LEN_WITH_AES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 29 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn clear_roundtrip() {
        let crypto = crypto();
        let cipher = crypto.filename_cipher();
        let iv = crypto.filename_iv();
        let name = StoreFilename::clear("server-generated-name");
        let wire = name.write(cipher.as_ref(), iv).unwrap();
        let (decoded, consumed) = StoreFilename::read(&wire, cipher.as_ref(), iv).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded, name);
    }

    #[test]
    fn encrypted_roundtrip() {
        let crypto = crypto();
        let cipher = crypto.filename_cipher();
        let iv = crypto.filename_iv();
        let name = StoreFilename::encrypted("secret-report.docx");
        let wire = name.write(cipher.as_ref(), iv).unwrap();
        assert_ne!(&wire[2..], b"secret-report.docx");
        let (decoded, _) = StoreFilename::read(&wire, cipher.as_ref(), iv).unwrap();
        assert_eq!(decoded.cleartext, b"secret-report.docx");
    }

    #[test]
    fn rejects_unknown_encoding_bits() {
        let mut wire = vec![0u8; 4];
        let header: u16 = (4u16 << SIZE_SHIFT) | 0b11;
        wire[0..2].copy_from_slice(&header.to_be_bytes());
        let crypto = crypto();
        let cipher = crypto.filename_cipher();
        assert!(StoreFilename::read(&wire, cipher.as_ref(), crypto.filename_iv()).is_err());
    }
}
