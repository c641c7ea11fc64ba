//! The directory object itself: an ordered vector of entries keyed
//! by object-id, with flag-filtered serialization/iteration and the
//! dependency-pairs trailer.
//!
//! Lookups are a linear scan over the vector, except `id_index` — an
//! auxiliary id→position map built lazily and used only by
//! `find_entry_by_id` once a directory grows past [`ID_INDEX_THRESHOLD`]
//! entries, so long directories don't pay an O(n) scan on every lookup.

use std::cell::RefCell;
use std::collections::HashMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::attributes::StoreAttributes;
use coffer_core::crypto::{BlockCipher, CryptoContext};
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;

use crate::entry::{DirectoryEntry, EntryFlags};
use crate::header::{DirHeader, DirOptionFlags};

/// Above this many entries, `find_entry_by_id` builds (and reuses) an
/// id→index map instead of scanning linearly every time.
pub const ID_INDEX_THRESHOLD: usize = 64;

pub struct DirectoryObject {
    pub own_id: ObjectId,
    pub container_id: ObjectId,
    pub attribute_mod_time: u64,
    pub attributes: StoreAttributes,
    /// Entries in insertion order — the wire contract guarantees stable
    /// iteration order, which clients rely on for "list most-recent first"
    /// via reverse iteration.
    entries: Vec<DirectoryEntry>,
    id_index: RefCell<Option<HashMap<ObjectId, usize>>>,
}

impl DirectoryObject {
    pub fn new(own_id: ObjectId, container_id: ObjectId) -> Self {
        Self {
            own_id,
            container_id,
            attribute_mod_time: 0,
            attributes: StoreAttributes::empty(),
            entries: Vec::new(),
            id_index: RefCell::new(None),
        }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    fn invalidate_index(&self) {
        *self.id_index.borrow_mut() = None;
    }

    /// Appends a new entry. Entries are never reordered by this call —
    /// callers rely on append-only semantics for recent-first traversal.
    pub fn add_entry(&mut self, entry: DirectoryEntry) {
        self.invalidate_index();
        self.entries.push(entry);
    }

    /// Removes the entry with the given object-id, if present. Linear scan,
    /// as the original does.
    pub fn delete_entry(&mut self, object_id: ObjectId) -> Result<DirectoryEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.object_id == object_id)
            .ok_or(BackupError::CouldNotFindEntryInDirectory(object_id.as_u64()))?;
        self.invalidate_index();
        Ok(self.entries.remove(pos))
    }

    pub fn find_entry_by_id(&self, object_id: ObjectId) -> Option<&DirectoryEntry> {
        if self.entries.len() > ID_INDEX_THRESHOLD {
            if self.id_index.borrow().is_none() {
                let map = self
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (e.object_id, i))
                    .collect();
                *self.id_index.borrow_mut() = Some(map);
            }
            let index = self.id_index.borrow();
            let pos = *index.as_ref().unwrap().get(&object_id)?;
            return self.entries.get(pos);
        }
        self.entries.iter().find(|e| e.object_id == object_id)
    }

    pub fn find_entry_by_id_mut(&mut self, object_id: ObjectId) -> Option<&mut DirectoryEntry> {
        self.invalidate_index();
        self.entries.iter_mut().find(|e| e.object_id == object_id)
    }

    /// Rewrites an entry's attributes and attributes-hash without touching
    /// its flags. A bare attribute update (permissions, mtime) is not a new version of
    /// the file's content, so it must not set `OLD_VERSION` on anything or
    /// allocate a new object-id — it just overwrites the entry in place.
    pub fn update_attributes_in_place(
        &mut self,
        object_id: ObjectId,
        attributes: StoreAttributes,
        attributes_hash: u64,
        modification_time: u64,
    ) -> Result<()> {
        let entry = self
            .find_entry_by_id_mut(object_id)
            .ok_or(BackupError::CouldNotFindEntryInDirectory(object_id.as_u64()))?;
        entry.attributes = attributes;
        entry.attributes_hash = attributes_hash;
        entry.modification_time = modification_time;
        Ok(())
    }

    /// Forward iterator over entries matching `(flags_must_be_set,
    /// flags_not_to_be_set)`.
    pub fn iter_filtered(
        &self,
        must_be_set: EntryFlags,
        not_to_be_set: EntryFlags,
    ) -> impl DoubleEndedIterator<Item = &DirectoryEntry> {
        self.entries
            .iter()
            .filter(move |e| e.flags.contains(must_be_set) && !e.flags.intersects(not_to_be_set))
    }

    /// Reverse iterator, for "most-recent first" traversal.
    pub fn iter_filtered_rev(
        &self,
        must_be_set: EntryFlags,
        not_to_be_set: EntryFlags,
    ) -> impl Iterator<Item = &DirectoryEntry> {
        self.iter_filtered(must_be_set, not_to_be_set).rev()
    }

    /// Decrypts names during iteration to find the current (non-OldVersion,
    /// non-Deleted) entry matching `clear_name`. O(n) per call — callers
    /// must not use this in inner loops; it exists for single-shot lookups
    /// (e.g. CLI "does this name exist" checks), not hot paths.
    pub fn find_matching_clear_name(
        &self,
        clear_name: &[u8],
        cipher: &dyn BlockCipher,
        filename_iv: &[u8],
    ) -> Result<Option<&DirectoryEntry>> {
        for entry in self.iter_filtered(EntryFlags::empty(), EntryFlags::DELETED | EntryFlags::OLD_VERSION) {
            let cleartext = if entry.name.encoding == coffer_core::filename::Encoding::Clear {
                entry.name.cleartext.clone()
            } else {
                cipher.decrypt(filename_iv, &entry.name.write(cipher, filename_iv)?[2..])?
            };
            if cleartext == clear_name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Serializes entries matching `(flags_must_be_set, flags_not_to_be_set)`,
    /// writing the dependency-pairs trailer iff `include_dependencies` and
    /// any selected entry carries nonzero `depends_newer`/`depends_older`.
    pub fn serialize(
        &self,
        crypto: &CryptoContext,
        flags_must_be_set: EntryFlags,
        flags_not_to_be_set: EntryFlags,
        include_dependencies: bool,
    ) -> Result<Vec<u8>> {
        let cipher = crypto.filename_cipher();
        let selected: Vec<&DirectoryEntry> =
            self.iter_filtered(flags_must_be_set, flags_not_to_be_set).collect();

        let has_deps = include_dependencies && selected.iter().any(|e| e.has_dependency_info());
        let mut options = DirOptionFlags::empty();
        if has_deps {
            options |= DirOptionFlags::DEPENDENCY_INFO_PRESENT;
        }

        let header = DirHeader {
            entry_count: selected.len() as u32,
            own_id: self.own_id,
            container_id: self.container_id,
            attribute_mod_time: self.attribute_mod_time,
            options,
        };
        let mut out = Vec::new();
        header.write(&mut out)?;
        out.extend_from_slice(&self.attributes.write());

        for entry in &selected {
            entry.write_core(&mut out, cipher.as_ref(), crypto.filename_iv())?;
        }

        if has_deps {
            let deps: Vec<&DirectoryEntry> =
                selected.iter().copied().filter(|e| e.has_dependency_info()).collect();
            out.write_u32::<BigEndian>(deps.len() as u32)?;
            for entry in deps {
                out.write_u64::<BigEndian>(entry.object_id.as_u64())?;
                out.write_u64::<BigEndian>(entry.depends_newer.as_u64())?;
                out.write_u64::<BigEndian>(entry.depends_older.as_u64())?;
            }
        }
        Ok(out)
    }

    pub fn parse(bytes: &[u8], crypto: &CryptoContext) -> Result<Self> {
        let cipher = crypto.filename_cipher();
        let (header, mut offset) = DirHeader::read(bytes)?;
        let (attributes, attrs_len) = StoreAttributes::read(&bytes[offset..], 0)?;
        offset += attrs_len;

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (entry, consumed) =
                DirectoryEntry::read_core(&bytes[offset..], cipher.as_ref(), crypto.filename_iv())?;
            offset += consumed;
            entries.push(entry);
        }

        if header.options.contains(DirOptionFlags::DEPENDENCY_INFO_PRESENT) {
            if bytes.len() < offset + 4 {
                return Err(BackupError::PartialRead { expected: offset + 4, got: bytes.len() });
            }
            let count = (&bytes[offset..]).read_u32::<BigEndian>()?;
            offset += 4;
            for _ in 0..count {
                if bytes.len() < offset + 24 {
                    return Err(BackupError::PartialRead { expected: offset + 24, got: bytes.len() });
                }
                let mut cursor = &bytes[offset..];
                let object_id = ObjectId::from(cursor.read_u64::<BigEndian>()?);
                let depends_newer = ObjectId::from(cursor.read_u64::<BigEndian>()?);
                let depends_older = ObjectId::from(cursor.read_u64::<BigEndian>()?);
                offset += 24;
                if let Some(e) = entries.iter_mut().find(|e| e.object_id == object_id) {
                    e.depends_newer = depends_newer;
                    e.depends_older = depends_older;
                }
            }
        }

        Ok(Self {
            own_id: header.own_id,
            container_id: header.container_id,
            attribute_mod_time: header.attribute_mod_time,
            attributes,
            entries,
            id_index: RefCell::new(None),
        })
    }
}
