//! Error types for pinwatch

use thiserror::Error;

use crate::endpoint::EndpointKind;

/// Errors raised by the content store and its block protocol
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Store has been stopped")]
    Stopped,

    #[error("Frame codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while bringing a session up, running it, or tearing it down
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot watch {path}: {reason}")]
    WatchInit { path: String, reason: String },

    #[error("Watch root {0} is no longer readable")]
    WatchLost(String),

    #[error("Failed to ingest {entry}: {reason}")]
    Ingest { entry: String, reason: String },

    #[error("Sync engine did not stop cleanly: {0}")]
    EngineStop(String),

    #[error("Store initialization failed: {0}")]
    StoreInit(String),

    #[error("{kind} endpoint failed to start: {reason}")]
    EndpointStart { kind: EndpointKind, reason: String },

    #[error("Shutdown finished with {} error(s): {}", .0.len(), .0.join("; "))]
    Shutdown(Vec<String>),

    #[error("Request path escapes the server root: {0}")]
    Traversal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
