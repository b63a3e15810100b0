//! Content store node
//!
//! [`StoreNode`] is the running content-addressable store: a [`BlobStore`]
//! in the repo directory plus the swarm listener other peers fetch blocks
//! from. The sync engine only sees it through the [`ContentStore`] trait;
//! the gateway and control API hold it directly.

use async_trait::async_trait;
use cid::Cid;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::blob_store::{BlobStore, StorageStats};
use crate::endpoint::{EndpointKind, ServiceEndpoint};
use crate::error::{SessionError, StoreError};
use crate::events::{Event, EventBus};
use crate::swarm::SwarmHandler;
use crate::sync::RelativeEntry;

/// What the store returned for one ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub cid: Cid,
    pub size: u64,
    pub already_existed: bool,
}

/// The ingest surface the sync engine depends on
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Store `content` and publish it under `entry`, replacing whatever
    /// identifier `entry` pointed at before
    async fn ingest(
        &self,
        entry: &RelativeEntry,
        content: Vec<u8>,
    ) -> Result<IngestReceipt, StoreError>;

    /// False once the store has been asked to stop
    fn is_running(&self) -> bool;
}

/// Ports the node and its HTTP endpoints listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub swarm: u16,
    pub api: u16,
    pub gateway: u16,
}

impl Default for NodePorts {
    fn default() -> Self {
        Self {
            swarm: 4001,
            api: 5001,
            gateway: 8080,
        }
    }
}

impl NodePorts {
    /// Reject configurations where two services claim the same port.
    /// Port 0 (ephemeral) never conflicts.
    pub fn validate(&self) -> Result<(), SessionError> {
        let named = [
            ("swarm", self.swarm),
            ("api", self.api),
            ("gateway", self.gateway),
        ];
        for (i, (a_name, a)) in named.iter().enumerate() {
            for (b_name, b) in &named[i + 1..] {
                if *a != 0 && a == b {
                    return Err(SessionError::StoreInit(format!(
                        "{} and {} ports are both {}",
                        a_name, b_name, a
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A running content store
pub struct StoreNode {
    repo_dir: PathBuf,
    blobs: Arc<BlobStore>,
    running: AtomicBool,
    swarm: Mutex<ServiceEndpoint>,
    swarm_addr: SocketAddr,
    events: EventBus,
}

impl StoreNode {
    /// Open the repo and start the swarm listener
    pub async fn start(
        repo_dir: &Path,
        ports: NodePorts,
        events: EventBus,
    ) -> Result<Arc<Self>, SessionError> {
        ports.validate()?;

        let blobs = BlobStore::open(repo_dir).await.map_err(|e| {
            SessionError::StoreInit(format!("repo {} unusable: {}", repo_dir.display(), e))
        })?;
        let blobs = Arc::new(blobs);

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), ports.swarm);
        let mut swarm = ServiceEndpoint::new(EndpointKind::Swarm, bind_addr, events.clone());
        let swarm_addr = swarm
            .start(Arc::new(SwarmHandler::new(Arc::clone(&blobs))))
            .await
            .map_err(|e| SessionError::StoreInit(e.to_string()))?;

        events.emit(Event::StoreStarted {
            repo: repo_dir.display().to_string(),
        });

        Ok(Arc::new(Self {
            repo_dir: repo_dir.to_path_buf(),
            blobs,
            running: AtomicBool::new(true),
            swarm: Mutex::new(swarm),
            swarm_addr,
            events,
        }))
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn swarm_addr(&self) -> SocketAddr {
        self.swarm_addr
    }

    /// Store bytes, optionally publishing them under `name`
    pub async fn add(&self, name: Option<&str>, content: &[u8]) -> Result<IngestReceipt, StoreError> {
        if !self.is_running() {
            return Err(StoreError::Stopped);
        }
        let result = self.blobs.put(content).await?;
        if let Some(name) = name {
            if let Some(previous) = self.blobs.bind_name(name, result.cid) {
                debug!(name, %previous, cid = %result.cid, "Name superseded");
            }
        }
        Ok(IngestReceipt {
            cid: result.cid,
            size: result.size_bytes,
            already_existed: result.already_existed,
        })
    }

    /// Fetch a block's bytes
    pub async fn cat(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        self.blobs.get(cid).await
    }

    /// Size of a block
    pub async fn block_size(&self, cid: &Cid) -> Result<u64, StoreError> {
        self.blobs.size(cid).await
    }

    /// Published names and their current CIDs
    pub fn names(&self) -> BTreeMap<String, String> {
        self.blobs.names()
    }

    pub fn resolve_name(&self, name: &str) -> Option<Cid> {
        self.blobs.resolve_name(name)
    }

    pub async fn stats(&self) -> Result<StorageStats, StoreError> {
        self.blobs.stats().await
    }

    /// Node-level shutdown: refuse new ingests, close the swarm listener and
    /// persist the name index. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), SessionError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();
        if let Err(e) = self.swarm.lock().await.stop().await {
            failures.push(format!("swarm: {}", e));
        }
        if let Err(e) = self.blobs.flush_names().await {
            failures.push(format!("name index: {}", e));
        }

        self.events.emit(Event::StoreStopped);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Shutdown(failures))
        }
    }
}

#[async_trait]
impl ContentStore for StoreNode {
    async fn ingest(
        &self,
        entry: &RelativeEntry,
        content: Vec<u8>,
    ) -> Result<IngestReceipt, StoreError> {
        let receipt = self.add(Some(entry.as_str()), &content).await?;
        // A stop that raced the write already flushed the index
        if !self.is_running() {
            return Err(StoreError::Stopped);
        }
        Ok(receipt)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
