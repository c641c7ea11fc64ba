//! The wire protocol: a small request/response enum, postcard-encoded
//! and framed with a big-endian `u32` length prefix, carried over whatever
//! already-authenticated bidirectional stream the transport hands us. The
//! authentication handshake itself is out of scope here — this module
//! only speaks to an `AsyncRead + AsyncWrite` that already is one.

use coffer_core::error::{BackupError, Result};
use coffer_core::ObjectId;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Framed message cap — guards against a corrupt or hostile length prefix
/// forcing an unbounded allocation.
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// `QueryListDirectory`: fetch a directory's wire bytes, optionally
    /// including deleted and/or superseded entries.
    ListDirectory { dir_id: u64, include_deleted: bool, include_old_versions: bool },
    /// `QueryGetFile`: fetch one object's raw bytes (file or directory),
    /// by id. The client resolves diff chains itself (`coffer_client::restore`).
    GetObject { object_id: u64 },
    /// Upload a pre-encoded file object (fresh or diff) into `dir_id`,
    /// replacing any existing entry with the same `clear_name_hint`
    /// (used only for the server's own bookkeeping, not transmitted on
    /// the wire in cleartext — the directory entry's name stays encrypted).
    PutFile { dir_id: u64, bytes: Vec<u8>, size_in_blocks: u64, attributes_hash: u64 },
    /// `QueryDeleteFile`: mark a file entry (and its predecessor chain)
    /// deleted.
    DeleteFile { dir_id: u64, object_id: u64 },
    /// `QueryDeleteDirectory`: mark a directory entry deleted and enqueue
    /// it for housekeeping's deleted-directory queue once its contents
    /// are pruned.
    DeleteDirectory { dir_id: u64, object_id: u64 },
    /// `QueryUndeleteDirectory`.
    UndeleteDirectory { dir_id: u64, object_id: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Directory { bytes: Vec<u8> },
    Object { bytes: Vec<u8> },
    Allocated { object_id: u64 },
    Ok,
    Error { message: String },
}

impl Response {
    pub fn from_result(result: Result<Response>) -> Self {
        match result {
            Ok(response) => response,
            Err(err) => Response::Error { message: err.to_string() },
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let bytes = postcard::to_allocvec(value)
        .map_err(|e| BackupError::BadBackupStoreFile(format!("protocol encode failed: {e}")))?;
    if bytes.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(BackupError::BadBackupStoreFile("protocol frame too large".into()));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin, T: for<'a> Deserialize<'a>>(reader: &mut R) -> Result<T> {
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(BackupError::BadBackupStoreFile("protocol frame exceeds maximum length".into()));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    postcard::from_bytes(&buf).map_err(|e| BackupError::BadBackupStoreFile(format!("protocol decode failed: {e}")))
}

pub(crate) fn object_id(raw: u64) -> ObjectId {
    ObjectId::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_roundtrips_through_frame() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = Request::ListDirectory { dir_id: 9, include_deleted: false, include_old_versions: true };
        write_frame(&mut client, &request).await.unwrap();
        let decoded: Request = read_frame(&mut server).await.unwrap();
        match decoded {
            Request::ListDirectory { dir_id, include_deleted, include_old_versions } => {
                assert_eq!(dir_id, 9);
                assert!(!include_deleted);
                assert!(include_old_versions);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_response_carries_message() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let response = Response::from_result(Err(BackupError::AccountBusy));
        write_frame(&mut client, &response).await.unwrap();
        let decoded: Response = read_frame(&mut server).await.unwrap();
        match decoded {
            Response::Error { message } => assert!(message.contains("busy")),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
