//! The directory object header: magic, entry count, own-id,
//! container-id, attribute-mod-time, options bitmask.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

const MAGIC_DIR: u32 = 0x3b1e_fb8a;

bitflags::bitflags! {
    /// Options bitmask on the directory header. `DependencyInfoPresent`
    /// gates whether the optional dependency-pairs trailer follows the
    /// entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirOptionFlags: u32 {
        const DEPENDENCY_INFO_PRESENT = 0x01;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DirHeader {
    pub entry_count: u32,
    pub own_id: ObjectId,
    pub container_id: ObjectId,
    pub attribute_mod_time: u64,
    pub options: DirOptionFlags,
}

impl DirHeader {
    pub const WIRE_LEN: usize = 4 + 4 + 8 + 8 + 8 + 4;

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(MAGIC_DIR)?;
        out.write_u32::<BigEndian>(self.entry_count)?;
        out.write_u64::<BigEndian>(self.own_id.as_u64())?;
        out.write_u64::<BigEndian>(self.container_id.as_u64())?;
        out.write_u64::<BigEndian>(self.attribute_mod_time)?;
        out.write_u32::<BigEndian>(self.options.bits())?;
        Ok(())
    }

    pub fn read(mut bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(BackupError::PartialRead { expected: Self::WIRE_LEN, got: bytes.len() });
        }
        let magic = bytes.read_u32::<BigEndian>()?;
        if magic != MAGIC_DIR {
            return Err(BackupError::BadMagic);
        }
        let entry_count = bytes.read_u32::<BigEndian>()?;
        let own_id = ObjectId::from(bytes.read_u64::<BigEndian>()?);
        let container_id = ObjectId::from(bytes.read_u64::<BigEndian>()?);
        let attribute_mod_time = bytes.read_u64::<BigEndian>()?;
        let options = DirOptionFlags::from_bits_truncate(bytes.read_u32::<BigEndian>()?);
        Ok((Self { entry_count, own_id, container_id, attribute_mod_time, options }, Self::WIRE_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = DirHeader {
            entry_count: 3,
            own_id: ObjectId::from(10),
            container_id: ObjectId::from(1),
            attribute_mod_time: 555,
            options: DirOptionFlags::DEPENDENCY_INFO_PRESENT,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let (decoded, consumed) = DirHeader::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.entry_count, 3);
        assert!(decoded.options.contains(DirOptionFlags::DEPENDENCY_INFO_PRESENT));
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; DirHeader::WIRE_LEN];
        assert!(matches!(DirHeader::read(&buf), Err(BackupError::BadMagic)));
    }
}
