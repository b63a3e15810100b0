//! pinwatch - mirror a directory into a local content-addressed store
//!
//! Files dropped under `<root>/.local/ipfs/content` are ingested into a
//! local block store as they appear or change, and the identifier of each
//! version is logged. Stored blocks are served to peers and clients.
//!
//! ## Architecture
//!
//! - **SyncEngine**: watches the content directory, ingests files in event order per entry
//! - **StoreNode**: block store plus the swarm listener peers fetch blocks from
//! - **Gateway / Control API**: HTTP retrieval and IPFS-style RPC on top of the node
//! - **IpfsSession**: ordered startup and best-effort ordered teardown of all of the above
//! - **StaticFileServer**: independent `serve http` mode over `<root>/.local/http`
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/.local/
//! ├── ipfs/
//! │   ├── content/             # Watched; anything written here is ingested
//! │   └── repo/
//! │       ├── blocks/xx/<cid>  # Raw blocks, sharded by CID suffix
//! │       └── names.json       # Entry name -> latest CID
//! └── http/                    # Document root for `serve http`
//! ```

pub mod api;
pub mod blob_store;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod gateway;
pub mod node;
pub mod response;
pub mod session;
pub mod signal;
pub mod static_server;
pub mod swarm;
pub mod sync;

// Re-exports
pub use blob_store::BlobStore;
pub use config::Config;
pub use endpoint::{EndpointKind, EndpointState, ServiceEndpoint};
pub use error::{SessionError, StoreError};
pub use events::{Event, EventBus};
pub use node::{ContentStore, IngestReceipt, NodePorts, StoreNode};
pub use session::IpfsSession;
pub use signal::{CtrlCShutdown, KeypressShutdown, ManualShutdown, ShutdownSignal};
pub use static_server::StaticFileServer;
pub use sync::{EngineState, RelativeEntry, SyncEngine, WatchedRoot};
