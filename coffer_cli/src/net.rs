//! A thin TCP implementation of `coffer_server::protocol` for the CLI's
//! `push`/`restore` commands: frames `Request`/`Response` over a plain
//! `TcpStream` (the auth handshake is out of scope — same stance
//! `coffer_server::serve_connection` takes on the accept side).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coffer_core::error::{BackupError, Result as BackupResult};
use coffer_core::ObjectId;
use coffer_core::crypto::CryptoContext;
use coffer_dirformat::DirectoryObject;
use coffer_server::protocol::{read_frame, write_frame, Request, Response};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct ServerConnection {
    stream: Mutex<TcpStream>,
}

impl ServerConnection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.with_context(|| format!("connecting to {addr}"))?;
        Ok(Self { stream: Mutex::new(stream) })
    }

    pub async fn request(&self, request: Request) -> Result<Response> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &request).await.map_err(to_anyhow)?;
        let response: Response = read_frame(&mut *stream).await.map_err(to_anyhow)?;
        Ok(response)
    }

    pub async fn get_object_bytes(&self, object_id: u64) -> Result<Vec<u8>> {
        match self.request(Request::GetObject { object_id }).await? {
            Response::Object { bytes } => Ok(bytes),
            Response::Error { message } => Err(anyhow!("server error: {message}")),
            other => Err(anyhow!("unexpected response to GetObject: {other:?}")),
        }
    }

    pub async fn list_directory_bytes(
        &self,
        dir_id: u64,
        include_deleted: bool,
        include_old_versions: bool,
    ) -> Result<Vec<u8>> {
        match self
            .request(Request::ListDirectory { dir_id, include_deleted, include_old_versions })
            .await?
        {
            Response::Directory { bytes } => Ok(bytes),
            Response::Error { message } => Err(anyhow!("server error: {message}")),
            other => Err(anyhow!("unexpected response to ListDirectory: {other:?}")),
        }
    }

    pub async fn put_file(
        &self,
        dir_id: u64,
        bytes: Vec<u8>,
        size_in_blocks: u64,
        attributes_hash: u64,
    ) -> Result<u64> {
        match self.request(Request::PutFile { dir_id, bytes, size_in_blocks, attributes_hash }).await? {
            Response::Allocated { object_id } => Ok(object_id),
            Response::Error { message } => Err(anyhow!("server error: {message}")),
            other => Err(anyhow!("unexpected response to PutFile: {other:?}")),
        }
    }
}

fn to_anyhow(e: BackupError) -> anyhow::Error {
    anyhow::Error::new(e)
}

/// `coffer_client::restore::RemoteSource` over a live server connection.
pub struct TcpRemoteSource<'a> {
    pub conn: &'a ServerConnection,
    pub crypto: &'a CryptoContext,
    pub include_deleted: bool,
    pub include_old_versions: bool,
}

#[async_trait]
impl<'a> coffer_client::RemoteSource for TcpRemoteSource<'a> {
    async fn list_directory(&self, dir_id: ObjectId) -> BackupResult<DirectoryObject> {
        let bytes = self
            .conn
            .list_directory_bytes(dir_id.as_u64(), self.include_deleted, self.include_old_versions)
            .await
            .map_err(|e| BackupError::BadBackupStoreFile(e.to_string()))?;
        DirectoryObject::parse(&bytes, self.crypto)
    }

    async fn get_object(&self, object_id: ObjectId) -> BackupResult<Vec<u8>> {
        self.conn
            .get_object_bytes(object_id.as_u64())
            .await
            .map_err(|e| BackupError::BadBackupStoreFile(e.to_string()))
    }
}
