//! Swarm block protocol
//!
//! Peers open a TCP connection to the swarm port and exchange
//! length-prefixed MessagePack frames: a 4-byte big-endian length followed
//! by an `rmp-serde` encoded [`BlockRequest`] or [`BlockResponse`]. Several
//! requests may be sent on one connection; each gets exactly one response.

use async_trait::async_trait;
use cid::Cid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::blob_store::BlobStore;
use crate::endpoint::ConnectionHandler;
use crate::error::StoreError;

/// Largest frame accepted in either direction
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Block request types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockRequest {
    /// Get a block by CID
    Get { cid: String },
    /// Check if the peer has a block
    Have { cid: String },
}

/// Block response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockResponse {
    Data(Vec<u8>),
    Have(bool),
    NotFound,
    Error(String),
}

/// Read one frame; `Ok(None)` on a clean end of stream
pub async fn read_frame<T, R>(io: &mut R) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match io.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(StoreError::Codec(format!("frame of {} bytes exceeds limit", len)));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    rmp_serde::from_slice(&buf)
        .map(Some)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

/// Write one frame
pub async fn write_frame<T, W>(io: &mut W, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = rmp_serde::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))?;
    if data.len() > MAX_FRAME_LEN {
        return Err(StoreError::Codec(format!(
            "frame of {} bytes exceeds limit",
            data.len()
        )));
    }

    io.write_all(&(data.len() as u32).to_be_bytes()).await?;
    io.write_all(&data).await?;
    io.flush().await?;
    Ok(())
}

/// Send a single request to a peer's swarm port
pub async fn request(addr: SocketAddr, req: &BlockRequest) -> Result<BlockResponse, StoreError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, req).await?;
    read_frame(&mut stream)
        .await?
        .ok_or_else(|| StoreError::Codec("peer closed before responding".to_string()))
}

/// Serves blocks from the local store
pub struct SwarmHandler {
    blobs: Arc<BlobStore>,
}

impl SwarmHandler {
    pub fn new(blobs: Arc<BlobStore>) -> Self {
        Self { blobs }
    }

    async fn respond(&self, req: BlockRequest) -> BlockResponse {
        match req {
            BlockRequest::Get { cid } => match cid.parse::<Cid>() {
                Ok(cid) => match self.blobs.get(&cid).await {
                    Ok(data) => BlockResponse::Data(data),
                    Err(StoreError::NotFound(_)) => BlockResponse::NotFound,
                    Err(e) => BlockResponse::Error(e.to_string()),
                },
                Err(e) => BlockResponse::Error(format!("invalid CID {}: {}", cid, e)),
            },
            BlockRequest::Have { cid } => match cid.parse::<Cid>() {
                Ok(cid) => BlockResponse::Have(self.blobs.exists(&cid).await),
                Err(e) => BlockResponse::Error(format!("invalid CID {}: {}", cid, e)),
            },
        }
    }
}

#[async_trait]
impl ConnectionHandler for SwarmHandler {
    async fn serve_connection(&self, mut stream: TcpStream, remote: SocketAddr) {
        loop {
            let req = match read_frame::<BlockRequest, _>(&mut stream).await {
                Ok(Some(req)) => req,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %remote, error = %e, "Bad swarm frame");
                    break;
                }
            };

            debug!(peer = %remote, ?req, "Swarm request");
            let response = self.respond(req).await;
            if let Err(e) = write_frame(&mut stream, &response).await {
                debug!(peer = %remote, error = %e, "Swarm peer went away");
                break;
            }
        }
    }
}
