//! Content-addressed block storage
//!
//! Stores blocks in the repo directory keyed by CIDv1 (raw codec, sha2-256),
//! and keeps a name index mapping each published path to the CID most
//! recently stored under it.
//!
//! ```text
//! repo/
//! ├── blocks/
//! │   └── <2 chars>/        # next-to-last two chars of the CID
//! │       └── bafkrei...
//! └── names.json            # path -> CID
//! ```

use cid::Cid;
use dashmap::DashMap;
use multihash_codetable::{Code, MultihashDigest};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Multicodec code for raw binary blocks
pub const RAW_CODEC: u64 = 0x55;

const NAMES_FILE: &str = "names.json";

/// Result of storing a block
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub cid: Cid,
    pub size_bytes: u64,
    /// Whether the block was already present
    pub already_existed: bool,
}

/// Block storage manager
pub struct BlobStore {
    root_dir: PathBuf,
    names: DashMap<String, Cid>,
    tmp_counter: AtomicU64,
}

impl BlobStore {
    /// Open (or create) a block store rooted at `root_dir`
    pub async fn open<P: AsRef<Path>>(root_dir: P) -> Result<Self, StoreError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(root_dir.join("blocks")).await?;

        let names = DashMap::new();
        let names_path = root_dir.join(NAMES_FILE);
        match fs::read_to_string(&names_path).await {
            Ok(content) => {
                let stored: BTreeMap<String, String> = serde_json::from_str(&content)?;
                for (name, cid) in stored {
                    match cid.parse::<Cid>() {
                        Ok(cid) => {
                            names.insert(name, cid);
                        }
                        Err(e) => warn!(%name, error = %e, "Skipping unreadable name record"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = %root_dir.display(), names = names.len(), "Opened block store");

        Ok(Self {
            root_dir,
            names,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Compute the CID a block would be stored under
    pub fn compute_cid(data: &[u8]) -> Cid {
        Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(data))
    }

    fn block_path(&self, cid: &Cid) -> PathBuf {
        let key = cid.to_string();
        let len = key.len();
        let shard = if len >= 3 { &key[len - 3..len - 1] } else { "_" };
        self.root_dir.join("blocks").join(shard).join(key)
    }

    /// Store a block, returning its CID
    pub async fn put(&self, data: &[u8]) -> Result<StoreResult, StoreError> {
        let cid = Self::compute_cid(data);
        let block_path = self.block_path(&cid);

        if fs::metadata(&block_path).await.is_ok() {
            debug!(%cid, "Block already exists");
            return Ok(StoreResult {
                cid,
                size_bytes: data.len() as u64,
                already_existed: true,
            });
        }

        if let Some(parent) = block_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the final path, then rename, so readers never see a torn block
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = block_path.with_extension(format!("tmp{}", n));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &block_path).await?;

        debug!(%cid, size = data.len(), "Stored block");

        Ok(StoreResult {
            cid,
            size_bytes: data.len() as u64,
            already_existed: false,
        })
    }

    /// Check if a block exists
    pub async fn exists(&self, cid: &Cid) -> bool {
        fs::metadata(self.block_path(cid)).await.is_ok()
    }

    /// Get block size without loading it
    pub async fn size(&self, cid: &Cid) -> Result<u64, StoreError> {
        match fs::metadata(self.block_path(cid)).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(cid.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retrieve a block, verifying it against its CID
    pub async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        let data = match fs::read(self.block_path(cid)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(cid.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let computed = Cid::new_v1(cid.codec(), Code::Sha2_256.digest(&data));
        if computed != *cid {
            warn!(%cid, %computed, "Block content does not match its CID");
            return Err(StoreError::NotFound(cid.to_string()));
        }

        Ok(data)
    }

    /// Point `name` at `cid`, returning the CID it replaced
    pub fn bind_name(&self, name: &str, cid: Cid) -> Option<Cid> {
        self.names.insert(name.to_string(), cid)
    }

    /// CID currently bound to `name`
    pub fn resolve_name(&self, name: &str) -> Option<Cid> {
        self.names.get(name).map(|cid| *cid)
    }

    /// All name bindings, sorted by name
    pub fn names(&self) -> BTreeMap<String, String> {
        self.names
            .iter()
            .map(|item| (item.key().clone(), item.value().to_string()))
            .collect()
    }

    /// Persist the name index
    pub async fn flush_names(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.names())?;
        let path = self.root_dir.join(NAMES_FILE);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &path).await?;
        debug!(names = self.names.len(), "Flushed name index");
        Ok(())
    }

    /// Get storage statistics
    pub async fn stats(&self) -> Result<StorageStats, StoreError> {
        let mut total_blocks = 0u64;
        let mut total_bytes = 0u64;

        let mut shards = fs::read_dir(self.root_dir.join("blocks")).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut blocks = fs::read_dir(shard.path()).await?;
            while let Some(block) = blocks.next_entry().await? {
                let metadata = block.metadata().await?;
                if metadata.is_file() && block.path().extension().is_none() {
                    total_blocks += 1;
                    total_bytes += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            total_blocks,
            total_bytes,
            names: self.names.len() as u64,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_blocks: u64,
    pub total_bytes: u64,
    pub names: u64,
}
