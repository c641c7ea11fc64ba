//! The restore engine: walks a remote directory subtree, recreating it on
//! local disk, resumable via a journal file written alongside the restore
//! target. Grounded in `BackupClientRestore.cpp`'s resume-journal format
//! and its post-order-on-server, pre-order-on-local walk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use coffer_core::crypto::CryptoContext;
use coffer_core::error::{BackupError, RestoreStatus, Result};
use coffer_core::ObjectId;
use coffer_dirformat::{DirectoryEntry, DirectoryObject, EntryFlags};
use coffer_fileformat::combine::combine_file;
use coffer_fileformat::decode::{decode_to_cleartext, parse};
use tokio::io::AsyncWriteExt;

/// Flush the journal to disk after this many bytes of restored file content,
/// taken directly from the original's `MAX_BYTES_WRITTEN_BETWEEN_RESTORE_INFO_SAVES`.
pub const RESTORE_JOURNAL_FLUSH_BYTES: u64 = 128 * 1024;

/// The remote half of a restore: fetching directory listings and object
/// bytes. In production this is implemented against the wire protocol by
/// `coffer_server`'s client-facing counterpart; tests use a small in-memory
/// stand-in.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list_directory(&self, dir_id: ObjectId) -> Result<DirectoryObject>;
    async fn get_object(&self, object_id: ObjectId) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    pub resume: bool,
    pub include_deleted: bool,
    pub include_old_versions: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self { resume: false, include_deleted: false, include_old_versions: false }
    }
}

/// One level of the journal's linked list: the object-ids already restored
/// directly under this directory, plus a pointer to the subdirectory
/// currently being descended into, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JournalLevel {
    done: Vec<ObjectId>,
    child: Option<(ObjectId, String)>,
}

fn write_levels(out: &mut Vec<u8>, levels: &[JournalLevel]) -> Result<()> {
    let Some((level, rest)) = levels.split_first() else { return Ok(()) };
    out.write_u64::<BigEndian>(level.done.len() as u64)?;
    for id in &level.done {
        out.write_u64::<BigEndian>(id.as_u64())?;
    }
    match &level.child {
        Some((id, name)) => {
            out.write_u64::<BigEndian>(id.as_u64())?;
            let name_bytes = name.as_bytes();
            out.write_u32::<BigEndian>(name_bytes.len() as u32)?;
            out.extend_from_slice(name_bytes);
            write_levels(out, rest)
        }
        None => {
            out.write_u64::<BigEndian>(0)?;
            Ok(())
        }
    }
}

fn read_levels(mut bytes: &[u8]) -> Result<Vec<JournalLevel>> {
    let mut levels = Vec::new();
    loop {
        let count = bytes.read_u64::<BigEndian>()?;
        let mut done = Vec::with_capacity(count as usize);
        for _ in 0..count {
            done.push(ObjectId::from(bytes.read_u64::<BigEndian>()?));
        }
        let next_id = bytes.read_u64::<BigEndian>()?;
        if next_id == 0 {
            levels.push(JournalLevel { done, child: None });
            return Ok(levels);
        }
        let name_len = bytes.read_u32::<BigEndian>()? as usize;
        if bytes.len() < name_len {
            return Err(BackupError::BadBackupStoreFile("truncated restore journal".into()));
        }
        let name = String::from_utf8(bytes[..name_len].to_vec())
            .map_err(|_| BackupError::BadBackupStoreFile("non-utf8 restore journal filename".into()))?;
        bytes = &bytes[name_len..];
        levels.push(JournalLevel { done, child: Some((ObjectId::from(next_id), name)) });
    }
}

fn journal_path_for(target_root: &Path) -> PathBuf {
    let mut name = target_root.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".restore-journal");
    target_root.with_file_name(name)
}

struct Journal {
    path: PathBuf,
    stack: Vec<JournalLevel>,
    bytes_since_flush: u64,
}

impl Journal {
    async fn flush(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        write_levels(&mut buf, &self.stack)?;
        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        self.bytes_since_flush = 0;
        Ok(())
    }

    async fn note_restored_bytes(&mut self, len: u64) -> Result<()> {
        self.bytes_since_flush += len;
        if self.bytes_since_flush >= RESTORE_JOURNAL_FLUSH_BYTES {
            self.flush().await?;
        }
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub async fn restore_tree(
    source: &dyn RemoteSource,
    crypto: &CryptoContext,
    root_dir_id: ObjectId,
    target_root: &Path,
    options: RestoreOptions,
) -> Result<RestoreStatus> {
    let journal_path = journal_path_for(target_root);
    let journal_bytes = tokio::fs::read(&journal_path).await.ok();

    let initial_stack = match journal_bytes {
        Some(bytes) => match read_levels(&bytes) {
            Ok(stack) if options.resume => Some(stack),
            Ok(_) => return Ok(RestoreStatus::ResumePossible),
            Err(_) => return Ok(RestoreStatus::TargetExists),
        },
        None => {
            if tokio::fs::metadata(target_root).await.is_ok() {
                return Ok(RestoreStatus::TargetExists);
            }
            None
        }
    };

    if let Some(parent) = target_root.parent() {
        if !parent.as_os_str().is_empty() && tokio::fs::metadata(parent).await.is_err() {
            return Ok(RestoreStatus::TargetPathNotFound);
        }
    }

    let mut journal = Journal { path: journal_path, stack: initial_stack.unwrap_or_default(), bytes_since_flush: 0 };

    walk_level(source, crypto, &mut journal, root_dir_id, target_root.to_path_buf(), &options, 0).await?;

    journal.delete().await?;
    Ok(RestoreStatus::Complete)
}

fn walk_level<'a>(
    source: &'a dyn RemoteSource,
    crypto: &'a CryptoContext,
    journal: &'a mut Journal,
    dir_id: ObjectId,
    local_dir: PathBuf,
    options: &'a RestoreOptions,
    depth: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&local_dir).await?;

        let dir = source.list_directory(dir_id).await?;

        let mut not_set = EntryFlags::empty();
        if !options.include_deleted {
            not_set |= EntryFlags::DELETED;
        }
        if !options.include_old_versions {
            not_set |= EntryFlags::OLD_VERSION;
        }

        if journal.stack.len() <= depth {
            journal.stack.push(JournalLevel::default());
        }

        let entries: Vec<DirectoryEntry> =
            dir.iter_filtered(EntryFlags::empty(), not_set).cloned().collect();

        for entry in &entries {
            if entry.is_dir() {
                continue;
            }
            if journal.stack[depth].done.contains(&entry.object_id) {
                continue;
            }
            restore_file(source, crypto, journal, &local_dir, entry, depth).await?;
        }

        for entry in &entries {
            if !entry.is_dir() {
                continue;
            }
            if journal.stack[depth].done.contains(&entry.object_id) {
                continue;
            }
            let name = entry_local_name(entry);
            let child_dir = local_dir.join(&name);
            journal.stack[depth].child = Some((entry.object_id, name));
            journal.flush().await?;

            walk_level(source, crypto, journal, entry.object_id, child_dir, options, depth + 1).await?;

            journal.stack.truncate(depth + 1);
            journal.stack[depth].child = None;
            journal.stack[depth].done.push(entry.object_id);
            journal.flush().await?;
        }

        let cipher = crypto.attribute_cipher();
        let dir_attrs = dir.attributes.cleartext(cipher.as_ref(), crypto.filename_iv())?;
        apply_attributes(&local_dir, &dir_attrs);
        Ok(())
    })
}

async fn restore_file(
    source: &dyn RemoteSource,
    crypto: &CryptoContext,
    journal: &mut Journal,
    local_dir: &Path,
    entry: &DirectoryEntry,
    depth: usize,
) -> Result<()> {
    let complete_bytes = resolve_complete_object_bytes(source, crypto, entry.object_id).await?;
    let parsed = parse(&complete_bytes, crypto)?;
    let cleartext = decode_to_cleartext(&parsed, crypto, |_| {
        unreachable!("resolve_complete_object_bytes always returns a complete object")
    })?;

    let name = entry_local_name(entry);
    let target_path = local_dir.join(&name);

    match tokio::fs::remove_file(&target_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::write(&target_path, &cleartext).await?;
    let cipher = crypto.attribute_cipher();
    let attrs = entry.attributes.cleartext(cipher.as_ref(), crypto.filename_iv())?;
    apply_attributes(&target_path, &attrs);

    journal.stack[depth].done.push(entry.object_id);
    journal.note_restored_bytes(cleartext.len() as u64).await?;
    Ok(())
}

/// Resolves a file object's id to complete cleartext *bytes* (header +
/// trailer still attached), combining its diff chain if necessary. Unlike
/// [`resolve_complete_object`] this one actually parses with `crypto` at
/// each step, which is required to read `index_header.other_file_id`
/// (it sits past the encrypted filename/attributes).
async fn resolve_complete_object_bytes(
    source: &dyn RemoteSource,
    crypto: &CryptoContext,
    object_id: ObjectId,
) -> Result<Vec<u8>> {
    let bytes = source.get_object(object_id).await?;
    let other_file_id = parse(&bytes, crypto)?.index_header.other_file_id;
    if other_file_id.is_none() {
        return Ok(bytes);
    }
    let base = Box::pin(resolve_complete_object_bytes(source, crypto, other_file_id)).await?;
    combine_file(&bytes, &base, crypto)
}

/// `DirectoryObject::parse` already decrypts names into `StoreFilename::cleartext`
/// (the encoding tag only matters for re-serializing), so this is a plain copy.
fn entry_local_name(entry: &DirectoryEntry) -> String {
    String::from_utf8_lossy(&entry.name.cleartext).into_owned()
}

/// Attribute bytes here are an opaque, application-defined blob; what they
/// mean on disk (unix mode, timestamps, ACLs...) is a policy decision for
/// whoever embeds this engine, not this crate's job.
fn apply_attributes(path: &Path, _cleartext_attrs: &[u8]) {
    tracing::debug!(path = %path.display(), "attributes available for caller-defined application");
}
