//! The file object header: magic, container-id, modification time,
//! max-block-cleartext-size, option flags, and total block count — all
//! big-endian, fixed layout.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

/// File-header magic values. V0 is legacy: recognizable on read, never
/// produced by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    FileV0,
    FileV1,
}

const MAGIC_FILE_V0: u32 = 0x3026_ba56;
const MAGIC_FILE_V1: u32 = 0x3026_ba57;

impl Magic {
    fn to_u32(self) -> u32 {
        match self {
            Magic::FileV0 => MAGIC_FILE_V0,
            Magic::FileV1 => MAGIC_FILE_V1,
        }
    }

    fn from_u32(v: u32) -> Result<Self> {
        match v {
            MAGIC_FILE_V0 => Ok(Magic::FileV0),
            MAGIC_FILE_V1 => Ok(Magic::FileV1),
            _ => Err(BackupError::BadMagic),
        }
    }
}

bitflags::bitflags! {
    /// Option flags on the file header. Currently only `HasAesKey` is
    /// defined, distinguishing V1 objects encrypted with the high-strength
    /// file-block key from ones that fell back to Blowfish.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileOptionFlags: u32 {
        const HAS_AES_KEY = 0x01;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub magic: Magic,
    pub container_id: ObjectId,
    pub modification_time: u64,
    pub max_block_clear_size: u32,
    pub options: FileOptionFlags,
    pub num_blocks: u64,
}

impl FileHeader {
    pub const WIRE_LEN: usize = 4 + 8 + 8 + 4 + 4 + 8;

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.magic.to_u32())?;
        out.write_u64::<BigEndian>(self.container_id.as_u64())?;
        out.write_u64::<BigEndian>(self.modification_time)?;
        out.write_u32::<BigEndian>(self.max_block_clear_size)?;
        out.write_u32::<BigEndian>(self.options.bits())?;
        out.write_u64::<BigEndian>(self.num_blocks)?;
        Ok(())
    }

    pub fn read(mut bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(BackupError::PartialRead { expected: Self::WIRE_LEN, got: bytes.len() });
        }
        let magic = Magic::from_u32(bytes.read_u32::<BigEndian>()?)?;
        let container_id = ObjectId::from(bytes.read_u64::<BigEndian>()?);
        let modification_time = bytes.read_u64::<BigEndian>()?;
        let max_block_clear_size = bytes.read_u32::<BigEndian>()?;
        let options = FileOptionFlags::from_bits_truncate(bytes.read_u32::<BigEndian>()?);
        let num_blocks = bytes.read_u64::<BigEndian>()?;
        Ok((
            Self { magic, container_id, modification_time, max_block_clear_size, options, num_blocks },
            Self::WIRE_LEN,
        ))
    }
}
