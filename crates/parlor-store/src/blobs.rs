//! Blob storage client for avatar images.
//!
//! The hosted blob service is another external collaborator: upload
//! bytes under a path, get back a handle, exchange the handle for a
//! public URL.  [`MemoryBlobBackend`] is the in-process reference
//! implementation.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use parlor_shared::constants::COMMAND_CHANNEL_CAPACITY;

use crate::error::{Result, StoreError};

/// Default upload ceiling for the memory backend (matches typical
/// avatar limits).
pub const DEFAULT_MAX_BLOB_SIZE: usize = 5 * 1024 * 1024;

/// Reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    id: Uuid,
}

/// Commands serviced by a blob backend.
#[derive(Debug)]
pub enum BlobCommand {
    Upload {
        path: String,
        bytes: Bytes,
        reply: oneshot::Sender<Result<BlobHandle>>,
    },
    PublicUrl {
        handle: BlobHandle,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// Handle to a blob backend task.
#[derive(Debug, Clone)]
pub struct BlobClient {
    cmd_tx: mpsc::Sender<BlobCommand>,
}

impl BlobClient {
    pub fn new(cmd_tx: mpsc::Sender<BlobCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Upload `bytes` under `path` and return the stored blob's handle.
    pub async fn upload(&self, path: &str, bytes: Bytes) -> Result<BlobHandle> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(BlobCommand::Upload {
                path: path.to_string(),
                bytes,
                reply,
            })
            .await
            .map_err(|_| StoreError::BackendClosed)?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }

    /// Resolve a handle to a publicly servable URL.
    pub async fn public_url(&self, handle: &BlobHandle) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(BlobCommand::PublicUrl {
                handle: handle.clone(),
                reply,
            })
            .await
            .map_err(|_| StoreError::BackendClosed)?;
        rx.await.map_err(|_| StoreError::BackendClosed)?
    }
}

struct StoredBlob {
    path: String,
    // Held so the backend owns the full object, even though the chat
    // core only ever asks for URLs.
    #[allow(dead_code)]
    bytes: Bytes,
}

/// In-memory blob backend.
pub struct MemoryBlobBackend;

impl MemoryBlobBackend {
    pub fn spawn() -> BlobClient {
        Self::spawn_with_limit(DEFAULT_MAX_BLOB_SIZE)
    }

    pub fn spawn_with_limit(max_size: usize) -> BlobClient {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut blobs: HashMap<Uuid, StoredBlob> = HashMap::new();
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    BlobCommand::Upload { path, bytes, reply } => {
                        let _ = reply.send(store_blob(&mut blobs, max_size, path, bytes));
                    }
                    BlobCommand::PublicUrl { handle, reply } => {
                        let result = blobs
                            .get(&handle.id)
                            .map(|blob| format!("memory://blobs/{}/{}", handle.id, blob.path))
                            .ok_or(StoreError::BlobNotFound);
                        let _ = reply.send(result);
                    }
                }
            }
            debug!("memory blob backend terminated");
        });

        BlobClient::new(cmd_tx)
    }
}

fn store_blob(
    blobs: &mut HashMap<Uuid, StoredBlob>,
    max_size: usize,
    path: String,
    bytes: Bytes,
) -> Result<BlobHandle> {
    if bytes.is_empty() {
        return Err(StoreError::EmptyBlob);
    }
    if bytes.len() > max_size {
        return Err(StoreError::BlobTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }

    let id = Uuid::new_v4();
    info!(%id, path = %path, size = bytes.len(), "blob stored");
    blobs.insert(id, StoredBlob { path, bytes });
    Ok(BlobHandle { id })
}
