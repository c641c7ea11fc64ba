//! Stream helpers shared by the file and directory codecs.
//!
//! All multi-byte integers in the on-disk formats are big-endian. A
//! length-prefixed mem-block is a 32-bit big-endian length followed by that
//! many bytes. `read_full` fails with `PartialRead` if EOF arrives before
//! the requested number of bytes — the async counterpart additionally
//! treats a timeout the same way.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, SeekFrom};

use crate::error::{BackupError, Result};

/// Where a seek is relative to — mirrors `std::io::SeekFrom` but is spelled
/// out here because object formats frequently seek from the end to locate
/// the block-index trailer, and that intent is worth naming at call sites.
#[derive(Debug, Clone, Copy)]
pub enum SeekMode {
    Absolute(u64),
    Relative(i64),
    FromEnd(i64),
}

impl From<SeekMode> for SeekFrom {
    fn from(mode: SeekMode) -> Self {
        match mode {
            SeekMode::Absolute(pos) => SeekFrom::Start(pos),
            SeekMode::Relative(delta) => SeekFrom::Current(delta),
            SeekMode::FromEnd(delta) => SeekFrom::End(delta),
        }
    }
}

pub async fn seek<S: AsyncSeek + Unpin>(stream: &mut S, mode: SeekMode) -> Result<u64> {
    Ok(stream.seek(mode.into()).await?)
}

/// Reads exactly `n` bytes, or fails with `PartialRead`. `timeout` of
/// `None` waits indefinitely (the common case for in-memory buffers);
/// `Some(d)` is used for socket reads, where a stalled peer must not hang
/// the request forever.
pub async fn read_full<S: AsyncRead + Unpin>(
    stream: &mut S,
    n: usize,
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let read_fut = stream.read_exact(&mut buf);
    let result = match timeout {
        Some(d) => tokio::time::timeout(d, read_fut)
            .await
            .map_err(|_| BackupError::PartialRead { expected: n, got: 0 })?,
        None => read_fut.await,
    };
    match result {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(BackupError::PartialRead { expected: n, got: 0 })
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn read_u32_be<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u32> {
    let buf = read_full(stream, 4, None).await?;
    Ok(u32::from_be_bytes(buf.try_into().unwrap()))
}

pub async fn read_u64_be<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u64> {
    let buf = read_full(stream, 8, None).await?;
    Ok(u64::from_be_bytes(buf.try_into().unwrap()))
}

pub async fn read_i64_be<S: AsyncRead + Unpin>(stream: &mut S) -> Result<i64> {
    let buf = read_full(stream, 8, None).await?;
    Ok(i64::from_be_bytes(buf.try_into().unwrap()))
}

/// Reads a length-prefixed mem-block: a 32-bit big-endian length followed
/// by that many bytes.
pub async fn read_mem_block<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let len = read_u32_be(stream).await? as usize;
    read_full(stream, len, None).await
}

/// Writes a length-prefixed mem-block.
pub fn write_mem_block(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_full_reads_exact_bytes() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        let buf = read_full(&mut cursor, 3, None).await.unwrap();
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn read_full_fails_on_early_eof() {
        let mut cursor = Cursor::new(vec![1, 2]);
        let err = read_full(&mut cursor, 5, None).await.unwrap_err();
        assert!(matches!(err, BackupError::PartialRead { expected: 5, .. }));
    }

    #[tokio::test]
    async fn mem_block_roundtrip() {
        let mut out = Vec::new();
        write_mem_block(&mut out, b"hello");
        let mut cursor = Cursor::new(out);
        let back = read_mem_block(&mut cursor).await.unwrap();
        assert_eq!(back, b"hello");
    }
}
