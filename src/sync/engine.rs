//! Sync engine
//!
//! Consumes [`FsEvent`]s from a single source and keeps the content store in
//! step with the watched tree:
//!
//! - added, changed and renamed-in files are read and ingested
//! - removals and renames away are reported only; nothing is retracted
//! - ingests for the same entry run strictly in event order, ingests for
//!   different entries run concurrently up to a permit limit
//! - if the watch root disappears the engine moves to
//!   [`EngineState::Failed`] and stops dispatching

use cid::Cid;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entry::{RelativeEntry, WatchedRoot};
use super::watcher::{scan_tree, FsEvent, FsWatcher};
use crate::config::SyncConfig;
use crate::error::{SessionError, StoreError};
use crate::events::{Event, EventBus};
use crate::node::ContentStore;

/// Lifecycle of a [`SyncEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Stopped,
    /// The watch root became unreadable
    Failed(String),
}

pub struct SyncEngine {
    root: WatchedRoot,
    state_rx: watch::Receiver<EngineState>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
    watcher: Option<FsWatcher>,
    records: Arc<DashMap<RelativeEntry, Cid>>,
}

impl SyncEngine {
    /// Watch `root` and start ingesting.
    ///
    /// Files already present are reported as added once the watch is in
    /// place, followed by [`Event::ScanComplete`].
    pub async fn start(
        root: &Path,
        store: Arc<dyn ContentStore>,
        events: EventBus,
        config: &SyncConfig,
    ) -> Result<Self, SessionError> {
        let root = WatchedRoot::open(root).await?;
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));

        let watch_path = root.path().to_path_buf();
        let watcher_tx = tx.clone();
        let watcher = tokio::task::spawn_blocking(move || FsWatcher::start(&watch_path, watcher_tx))
            .await
            .map_err(|e| watch_init(&root, e.to_string()))?
            .map_err(|e| watch_init(&root, e.to_string()))?;

        let mut engine = Self::with_source(root, rx, store, events, config);
        engine.watcher = Some(watcher);

        let scan_path = engine.root.path().to_path_buf();
        tokio::spawn(async move {
            let initial = match tokio::task::spawn_blocking(move || scan_tree(&scan_path)).await {
                Ok(initial) => initial,
                Err(e) => vec![FsEvent::WatchError(format!("initial scan failed: {}", e))],
            };
            for event in initial.into_iter().chain(std::iter::once(FsEvent::Ready)) {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(engine)
    }

    /// Run the engine on an arbitrary event source instead of a live watch
    pub fn with_source(
        root: WatchedRoot,
        source: mpsc::Receiver<FsEvent>,
        store: Arc<dyn ContentStore>,
        events: EventBus,
        config: &SyncConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Running);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let records = Arc::new(DashMap::new());

        let dispatcher = Dispatcher {
            root: root.clone(),
            store,
            events,
            records: Arc::clone(&records),
            lanes: HashMap::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_ingests.max(1))),
            state_tx,
        };
        let handle = tokio::spawn(dispatcher.run(source, shutdown_rx));

        Self {
            root,
            state_rx,
            shutdown_tx,
            dispatcher: Some(handle),
            watcher: None,
            records,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn state(&self) -> EngineState {
        self.state_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Last identifier logged for `entry`
    pub fn record(&self, entry: &RelativeEntry) -> Option<Cid> {
        self.records.get(entry).map(|cid| *cid)
    }

    /// Every entry ingested so far with its last logged identifier
    pub fn records(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .map(|r| (r.key().to_string(), r.value().to_string()))
            .collect()
    }

    /// Resolves with the reason once the engine has failed; never resolves
    /// if it stops cleanly
    pub async fn failure(&self) -> String {
        let mut rx = self.state_rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            if let EngineState::Failed(reason) = state {
                return reason;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Stop watching and stop dispatching. Ingests already running are left
    /// to finish; their results are reported if the store is still up.
    /// Safe to call more than once; only the first call can fail.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        drop(self.watcher.take());
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync dispatcher panicked");
                return Err(SessionError::EngineStop(e.to_string()));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replace_dispatcher(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Option<JoinHandle<()>> {
        self.dispatcher.replace(handle)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn watch_init(root: &WatchedRoot, reason: String) -> SessionError {
    SessionError::WatchInit {
        path: root.path().display().to_string(),
        reason,
    }
}

struct Dispatcher {
    root: WatchedRoot,
    store: Arc<dyn ContentStore>,
    events: EventBus,
    records: Arc<DashMap<RelativeEntry, Cid>>,
    /// Most recent ingest per entry; the next one for that entry waits on it
    lanes: HashMap<RelativeEntry, JoinHandle<()>>,
    permits: Arc<Semaphore>,
    state_tx: watch::Sender<EngineState>,
}

impl Dispatcher {
    async fn run(mut self, mut source: mpsc::Receiver<FsEvent>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                event = source.recv() => match event {
                    Some(event) => {
                        if !self.dispatch(event).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Running {
                *state = EngineState::Stopped;
                true
            } else {
                false
            }
        });
        debug!(root = %self.root.path().display(), "Sync dispatcher exited");
    }

    /// Handle one event; false once the engine has failed
    async fn dispatch(&mut self, event: FsEvent) -> bool {
        match event {
            FsEvent::Added(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::FileAdded {
                        entry: entry.to_string(),
                    });
                    self.schedule_ingest(entry, path);
                }
            }
            FsEvent::Changed(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::FileChanged {
                        entry: entry.to_string(),
                    });
                    self.schedule_ingest(entry, path);
                }
            }
            FsEvent::RenamedTo(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::FileMovedIn {
                        entry: entry.to_string(),
                    });
                    self.schedule_ingest(entry, path);
                }
            }
            FsEvent::Removed(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::FileRemoved {
                        entry: entry.to_string(),
                    });
                }
            }
            FsEvent::RenamedFrom(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::FileMovedOut {
                        entry: entry.to_string(),
                    });
                }
            }
            FsEvent::DirAdded(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::DirAdded {
                        path: entry.to_string(),
                    });
                }
            }
            FsEvent::DirRemoved(path) => {
                if let Some(entry) = self.entry_for(&path) {
                    self.events.emit(Event::DirRemoved {
                        path: entry.to_string(),
                    });
                }
            }
            FsEvent::Ready => self.events.emit(Event::ScanComplete),
            FsEvent::WatchError(message) => {
                self.events.emit(Event::WatchError { message });
                if !self.root.is_accessible().await {
                    let root = self.root.path().display().to_string();
                    self.state_tx
                        .send_replace(EngineState::Failed(format!("{} is no longer readable", root)));
                    self.events.emit(Event::WatchFailed { root });
                    return false;
                }
            }
        }
        true
    }

    fn entry_for(&self, path: &Path) -> Option<RelativeEntry> {
        let entry = self.root.entry_for(path);
        if entry.is_none() {
            debug!(path = %path.display(), "Ignoring event outside the watch root");
        }
        entry
    }

    fn schedule_ingest(&mut self, entry: RelativeEntry, path: PathBuf) {
        self.lanes.retain(|_, handle| !handle.is_finished());
        let previous = self.lanes.remove(&entry);

        let task = IngestTask {
            entry: entry.clone(),
            path,
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            records: Arc::clone(&self.records),
            permits: Arc::clone(&self.permits),
        };
        self.lanes.insert(entry, tokio::spawn(task.run(previous)));
    }
}

struct IngestTask {
    entry: RelativeEntry,
    path: PathBuf,
    store: Arc<dyn ContentStore>,
    events: EventBus,
    records: Arc<DashMap<RelativeEntry, Cid>>,
    permits: Arc<Semaphore>,
}

impl IngestTask {
    async fn run(self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        // Acquired only after the predecessor finished so a waiting lane
        // never holds a permit
        let _permit = match self.permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let entry = self.entry.to_string();
        if !self.store.is_running() {
            self.events.emit(Event::IngestDiscarded { entry });
            return;
        }

        // Reading a fifo would park a blocking thread and this permit forever
        let reason = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) if metadata.is_file() => None,
            Ok(_) => Some("not a regular file".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = reason {
            let error = SessionError::Ingest {
                entry: entry.clone(),
                reason,
            };
            self.events.emit(Event::IngestFailed {
                entry,
                error: error.to_string(),
            });
            return;
        }

        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                self.events.emit(Event::IngestFailed {
                    entry,
                    error: SessionError::from(e).to_string(),
                });
                return;
            }
        };

        match self.store.ingest(&self.entry, content).await {
            Ok(receipt) => {
                self.records.insert(self.entry.clone(), receipt.cid);
                self.events.emit(Event::Ingested {
                    entry,
                    cid: receipt.cid.to_string(),
                    size: receipt.size,
                });
            }
            Err(StoreError::Stopped) => self.events.emit(Event::IngestDiscarded { entry }),
            Err(e) => {
                let error = SessionError::Ingest {
                    entry: entry.clone(),
                    reason: e.to_string(),
                };
                self.events.emit(Event::IngestFailed {
                    entry,
                    error: error.to_string(),
                });
            }
        }
    }
}
