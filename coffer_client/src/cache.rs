//! The local "remote block index cache": a small sidecar file, keyed by
//! a blake3 hash of the absolute backed-up path, recording
//! the last object-id and block-index trailer the client saw for that
//! path. A fresh cache entry lets `diffstate::plan_upload` diff against a
//! prior object without re-downloading its full trailer first. Grounded in
//! `s5_node::sync`'s pattern of keeping small local sync-state sidecars
//! next to the content being synced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;
use coffer_fileformat::index::{read_entries, write_entries, BlockIndexEntry};

const MAGIC_CACHE_ENTRY: u32 = 0x6366_6331;
const HEADER_LEN: usize = 4 + 8 + 8 + 8;

/// Default freshness window for a cached entry (`ClientConfig::remote_index_ttl`).
pub const DEFAULT_REMOTE_INDEX_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRemoteIndex {
    pub object_id: ObjectId,
    pub cached_at: u64,
    pub entries: Vec<BlockIndexEntry>,
}

impl CachedRemoteIndex {
    pub fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.cached_at) < ttl.as_secs()
    }

    fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(MAGIC_CACHE_ENTRY).unwrap();
        out.write_u64::<BigEndian>(self.object_id.as_u64()).unwrap();
        out.write_u64::<BigEndian>(self.cached_at).unwrap();
        out.write_u64::<BigEndian>(self.entries.len() as u64).unwrap();
        write_entries(&mut out, &self.entries).unwrap();
        out
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BackupError::PartialRead { expected: HEADER_LEN, got: bytes.len() });
        }
        let mut cursor = bytes;
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != MAGIC_CACHE_ENTRY {
            return Err(BackupError::BadMagic);
        }
        let object_id = ObjectId::from(cursor.read_u64::<BigEndian>()?);
        let cached_at = cursor.read_u64::<BigEndian>()?;
        let count = cursor.read_u64::<BigEndian>()?;
        let (entries, _) = read_entries(&bytes[HEADER_LEN..], count)?;
        Ok(Self { object_id, cached_at, entries })
    }
}

/// One sidecar file per backed-up path, named by `blake3(absolute_path)`
/// under `cache_root`, so the cache never needs to mirror the real
/// directory structure.
pub struct RemoteIndexCache {
    cache_root: PathBuf,
}

impl RemoteIndexCache {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self { cache_root: cache_root.into() }
    }

    fn sidecar_path(&self, absolute_path: &Path) -> PathBuf {
        let digest = blake3::hash(absolute_path.to_string_lossy().as_bytes());
        self.cache_root.join(format!("{}.idx", digest.to_hex()))
    }

    pub fn load(&self, absolute_path: &Path) -> Result<Option<CachedRemoteIndex>> {
        match std::fs::read(self.sidecar_path(absolute_path)) {
            Ok(bytes) => Ok(Some(CachedRemoteIndex::read(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, absolute_path: &Path, entry: &CachedRemoteIndex) -> Result<()> {
        std::fs::create_dir_all(&self.cache_root)?;
        std::fs::write(self.sidecar_path(absolute_path), entry.write())?;
        Ok(())
    }

    pub fn invalidate(&self, absolute_path: &Path) -> Result<()> {
        match std::fs::remove_file(self.sidecar_path(absolute_path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(object_id: u64, cached_at: u64) -> CachedRemoteIndex {
        CachedRemoteIndex {
            object_id: ObjectId::from(object_id),
            cached_at,
            entries: vec![BlockIndexEntry {
                encoded_size: 128,
                clear_size: 64,
                iv_base: 7,
                weak_hash: 0xdead_beef,
                strong_hash: [9u8; 16],
            }],
        }
    }

    #[test]
    fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteIndexCache::new(dir.path());
        let path = Path::new("/home/user/documents/report.doc");
        cache.store(path, &entry(42, 1_000)).unwrap();
        let loaded = cache.load(path).unwrap().unwrap();
        assert_eq!(loaded, entry(42, 1_000));
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteIndexCache::new(dir.path());
        assert!(cache.load(Path::new("/never/seen")).unwrap().is_none());
    }

    #[test]
    fn distinct_paths_get_distinct_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteIndexCache::new(dir.path());
        cache.store(Path::new("/a"), &entry(1, 0)).unwrap();
        cache.store(Path::new("/b"), &entry(2, 0)).unwrap();
        assert_eq!(cache.load(Path::new("/a")).unwrap().unwrap().object_id, ObjectId::from(1));
        assert_eq!(cache.load(Path::new("/b")).unwrap().unwrap().object_id, ObjectId::from(2));
    }

    #[test]
    fn freshness_threshold() {
        let e = entry(1, 1_000);
        assert!(e.is_fresh(1_500, Duration::from_secs(600)));
        assert!(!e.is_fresh(2_000, Duration::from_secs(600)));
    }

    #[test]
    fn invalidate_removes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteIndexCache::new(dir.path());
        let path = Path::new("/x");
        cache.store(path, &entry(1, 0)).unwrap();
        cache.invalidate(path).unwrap();
        assert!(cache.load(path).unwrap().is_none());
        cache.invalidate(path).unwrap(); // idempotent
    }
}
