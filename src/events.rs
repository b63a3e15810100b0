//! Structured event sink
//!
//! Every component reports what it does through an [`EventBus`] instead of
//! printing. Each event is mirrored to `tracing` and broadcast to any
//! subscriber, so tests and embedders can observe the sync engine and the
//! session lifecycle without scraping log output.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::endpoint::EndpointKind;

/// Something observable happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A file appeared under the watched root
    FileAdded { entry: String },
    /// A file's content or timestamps changed
    FileChanged { entry: String },
    /// A file was deleted; nothing is retracted from the store
    FileRemoved { entry: String },
    /// A file was renamed into place under the root
    FileMovedIn { entry: String },
    /// A file was renamed away from its path under the root
    FileMovedOut { entry: String },
    DirAdded { path: String },
    DirRemoved { path: String },
    /// Initial scan of pre-existing files has been queued
    ScanComplete,
    /// Content was stored and the store returned an identifier
    Ingested { entry: String, cid: String, size: u64 },
    IngestFailed { entry: String, error: String },
    /// An ingest finished after the store stopped; result dropped
    IngestDiscarded { entry: String },
    WatchError { message: String },
    /// The watch root itself disappeared; the engine is no longer running
    WatchFailed { root: String },
    StoreStarted { repo: String },
    StoreStopped,
    EndpointStarted { kind: EndpointKind, addr: String },
    EndpointStopped { kind: EndpointKind },
    SessionStarted,
    ShutdownStepFailed { step: String, error: String },
    SessionStopped,
}

impl Event {
    fn log(&self) {
        match self {
            Event::FileAdded { entry } => info!(%entry, "File has been added"),
            Event::FileChanged { entry } => info!(%entry, "File has been changed"),
            Event::FileRemoved { entry } => info!(%entry, "File has been removed"),
            Event::FileMovedIn { entry } => info!(%entry, "File has been renamed into place"),
            Event::FileMovedOut { entry } => info!(%entry, "File has been renamed away"),
            Event::DirAdded { path } => info!(%path, "Directory has been added"),
            Event::DirRemoved { path } => info!(%path, "Directory has been removed"),
            Event::ScanComplete => info!("Initial scan complete. Ready for changes"),
            Event::Ingested { entry, cid, size } => info!(%entry, %cid, size, "File CID"),
            Event::IngestFailed { entry, error } => error!(%entry, %error, "Ingest failed"),
            Event::IngestDiscarded { entry } => {
                debug!(%entry, "Ingest finished after store shutdown, discarded")
            }
            Event::WatchError { message } => warn!(%message, "Watcher error"),
            Event::WatchFailed { root } => error!(%root, "Watch root lost, sync engine stopped"),
            Event::StoreStarted { repo } => info!(%repo, "Content store started"),
            Event::StoreStopped => info!("Content store stopped"),
            Event::EndpointStarted { kind, addr } => info!(%kind, %addr, "Endpoint listening"),
            Event::EndpointStopped { kind } => info!(%kind, "Endpoint stopped"),
            Event::SessionStarted => info!("Session started"),
            Event::ShutdownStepFailed { step, error } => {
                error!(%step, %error, "Shutdown step failed")
            }
            Event::SessionStopped => info!("Session stopped"),
        }
    }
}

/// Broadcasting event sink, cheap to clone
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event
    pub fn emit(&self, event: Event) {
        event.log();
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
