//! Sync Module - keeps the content store in step with a directory tree
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  FsWatcher    - notify watcher, translates raw events           │
//! │  Dispatcher   - one consumer loop, logs and schedules ingests   │
//! │  IngestTask   - read + ContentStore::ingest, chained per entry  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deletions and renames away are reported but never retract content.

pub mod engine;
pub mod entry;
pub mod watcher;

pub use engine::{EngineState, SyncEngine};
pub use entry::{RelativeEntry, WatchedRoot};
pub use watcher::{scan_tree, FsEvent, FsWatcher};
