//! A single directory entry: one name's current state within a
//! directory, including the flags and dependency links that drive the
//! diff-chain and housekeeping logic in `coffer_housekeeping`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::attributes::StoreAttributes;
use coffer_core::crypto::BlockCipher;
use coffer_core::error::{BackupError, Result};
use coffer_core::filename::StoreFilename;
use coffer_core::ObjectId;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u16 {
        const FILE         = 0x0001;
        const DIR          = 0x0002;
        const DELETED      = 0x0004;
        const OLD_VERSION  = 0x0008;
        const REMOVE_ASAP  = 0x0010;
    }
}

/// One directory entry. `mark`/`min_mark` are server-local monotonic
/// markers used internally by a live server implementation to order
/// concurrent mutations; they are not streamed on the simple wire path,
/// so they default to zero on parse and are never written.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub modification_time: u64,
    pub object_id: ObjectId,
    pub size_in_blocks: u64,
    pub attributes_hash: u64,
    pub flags: EntryFlags,
    pub name: StoreFilename,
    pub attributes: StoreAttributes,
    pub mark: u32,
    pub min_mark: u32,
    pub depends_newer: ObjectId,
    pub depends_older: ObjectId,
}

impl DirectoryEntry {
    pub fn is_file(&self) -> bool {
        self.flags.contains(EntryFlags::FILE)
    }

    pub fn is_dir(&self) -> bool {
        self.flags.contains(EntryFlags::DIR)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(EntryFlags::DELETED)
    }

    pub fn is_old_version(&self) -> bool {
        self.flags.contains(EntryFlags::OLD_VERSION)
    }

    pub fn is_remove_asap(&self) -> bool {
        self.flags.contains(EntryFlags::REMOVE_ASAP)
    }

    /// Writes the entry's core fields inline: mod-time, object-id,
    /// size-in-blocks, attributes-hash, flags, name, attributes.
    /// `depends_newer`/`depends_older` are written separately, in the
    /// optional dependency-pairs trailer, not here.
    pub fn write_core(
        &self,
        out: &mut Vec<u8>,
        cipher: &dyn BlockCipher,
        filename_iv: &[u8],
    ) -> Result<()> {
        out.write_u64::<BigEndian>(self.modification_time)?;
        out.write_u64::<BigEndian>(self.object_id.as_u64())?;
        out.write_u64::<BigEndian>(self.size_in_blocks)?;
        out.write_u64::<BigEndian>(self.attributes_hash)?;
        out.write_u16::<BigEndian>(self.flags.bits())?;
        let name_wire = self.name.write(cipher, filename_iv)?;
        out.extend_from_slice(&name_wire);
        out.extend_from_slice(&self.attributes.write());
        Ok(())
    }

    pub fn read_core(
        bytes: &[u8],
        cipher: &dyn BlockCipher,
        filename_iv: &[u8],
    ) -> Result<(Self, usize)> {
        const FIXED_LEN: usize = 8 + 8 + 8 + 8 + 2;
        if bytes.len() < FIXED_LEN {
            return Err(BackupError::PartialRead { expected: FIXED_LEN, got: bytes.len() });
        }
        let mut cursor = bytes;
        let modification_time = cursor.read_u64::<BigEndian>()?;
        let object_id = ObjectId::from(cursor.read_u64::<BigEndian>()?);
        let size_in_blocks = cursor.read_u64::<BigEndian>()?;
        let attributes_hash = cursor.read_u64::<BigEndian>()?;
        let flags = EntryFlags::from_bits_truncate(cursor.read_u16::<BigEndian>()?);
        let mut offset = FIXED_LEN;

        let (name, name_len) = StoreFilename::read(&bytes[offset..], cipher, filename_iv)?;
        offset += name_len;

        let (attributes, attrs_len) = StoreAttributes::read(&bytes[offset..], attributes_hash)?;
        offset += attrs_len;

        Ok((
            Self {
                modification_time,
                object_id,
                size_in_blocks,
                attributes_hash,
                flags,
                name,
                attributes,
                mark: 0,
                min_mark: 0,
                depends_newer: ObjectId::NONE,
                depends_older: ObjectId::NONE,
            },
            offset,
        ))
    }

    pub fn has_dependency_info(&self) -> bool {
        !self.depends_newer.is_none() || !self.depends_older.is_none()
    }
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
            *b = (i * 23 % 251) as u8;
        }
        std::fs::write(&key_path, buf).unwrap();
        CryptoContext::load(&key_path).unwrap()
    }

    #[test]
    fn core_roundtrip_preserves_name_and_flags() {
        let crypto = crypto();
        let name_cipher = crypto.filename_cipher();
        let attr_cipher = crypto.attribute_cipher();
        let iv = crypto.filename_iv();
        let mut attrs = StoreAttributes::empty();
        attrs.set_attributes(b"mode=0644", attr_cipher.as_ref(), iv, 99);
        let entry = DirectoryEntry {
            modification_time: 1000,
            object_id: ObjectId::from(42),
            size_in_blocks: 3,
            attributes_hash: 99,
            flags: EntryFlags::FILE | EntryFlags::OLD_VERSION,
            name: StoreFilename::encrypted("report.pdf"),
            attributes: attrs,
            mark: 0,
            min_mark: 0,
            depends_newer: ObjectId::from(50),
            depends_older: ObjectId::NONE,
        };
        let mut buf = Vec::new();
        entry.write_core(&mut buf, name_cipher.as_ref(), iv).unwrap();
        let (decoded, consumed) = DirectoryEntry::read_core(&buf, name_cipher.as_ref(), iv).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.object_id, entry.object_id);
        assert!(decoded.is_file());
        assert!(decoded.is_old_version());
        assert_eq!(decoded.name.cleartext, b"report.pdf");
        let decoded_attrs = decoded.attributes.cleartext(attr_cipher.as_ref(), iv).unwrap();
        assert_eq!(decoded_attrs, b"mode=0644");
        // Dependency fields are not part of the core wire format.
        assert!(decoded.depends_newer.is_none());
    }
}
