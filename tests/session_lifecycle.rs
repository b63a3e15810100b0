//! Integration tests for the `serve ipfs` session
//!
//! Every test binds ephemeral ports and uses a temporary project root.

mod common;

use common::{http_request, wait_for_content, wait_for_event, wait_for_ingest};
use pinwatch::{
    Config, ContentStore, EndpointKind, EndpointState, Event, EventBus, IpfsSession,
    ManualShutdown, SessionError,
};
use std::time::Duration;
use tempfile::TempDir;

fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.root = root.path().to_path_buf();
    config.ipfs.gateway_port = 0;
    config.ipfs.swarm_port = 0;
    config.ipfs.api_port = 0;
    config.ipfs.settle_delay_ms = 0;
    config
}

/// A control API bind failure stops startup before the sync engine and
/// shutdown still releases the store and gateway
#[tokio::test]
async fn test_api_bind_failure_releases_started_components() {
    let root = TempDir::new().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config(&root);
    config.ipfs.api_port = taken.local_addr().unwrap().port();

    let mut session = IpfsSession::new(config, EventBus::new());
    let signal = ManualShutdown::new();
    let result = session.run(&signal).await;

    assert!(matches!(
        result,
        Err(SessionError::EndpointStart {
            kind: EndpointKind::Api,
            ..
        })
    ));
    assert!(session.engine().is_none());
    assert_eq!(session.gateway_state(), EndpointState::Stopped);
    assert_eq!(session.api_state(), EndpointState::Stopped);
    assert!(!session.node().unwrap().is_running());

    // Already shut down by run()
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_ports_fail_store_init() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.ipfs.gateway_port = 18080;
    config.ipfs.api_port = 18080;

    let mut session = IpfsSession::new(config, EventBus::new());
    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::StoreInit(_))));
    assert!(session.node().is_none());

    session.shutdown().await.unwrap();
    assert_eq!(session.gateway_state(), EndpointState::Stopped);
}

#[tokio::test]
async fn test_files_are_ingested_and_served() {
    let root = TempDir::new().unwrap();
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let mut session = IpfsSession::new(test_config(&root), bus);
    session.start().await.unwrap();
    assert!(session.content_dir().is_dir());
    assert!(root.path().join(".local/ipfs/repo").is_dir());

    std::fs::write(session.content_dir().join("hello.txt"), b"hello").unwrap();
    let cid = wait_for_content(&mut events, "hello.txt", b"hello").await;

    let gateway = session.gateway_addr().unwrap();
    let api = session.api_addr().unwrap();

    // Gateway serves the raw block
    let resp = http_request(gateway, "GET", &format!("/ipfs/{}", cid), b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"hello");
    assert!(resp.header("etag").unwrap().contains(&cid));

    // Name index points at the latest version
    let resp = http_request(api, "POST", "/api/v0/name/resolve?arg=hello.txt", b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.json()["Path"], format!("/ipfs/{}", cid));

    // Content added through the API is retrievable through the gateway
    let resp = http_request(api, "POST", "/api/v0/add", b"via api").await;
    assert_eq!(resp.status, 200);
    let added = resp.json()["Hash"].as_str().unwrap().to_string();
    let resp = http_request(gateway, "HEAD", &format!("/ipfs/{}", added), b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-length").as_deref(), Some("7"));

    // API is POST only
    let resp = http_request(api, "GET", "/api/v0/version", b"").await;
    assert_eq!(resp.status, 405);

    session.shutdown().await.unwrap();
    assert_eq!(session.gateway_state(), EndpointState::Stopped);
    assert_eq!(session.api_state(), EndpointState::Stopped);
    assert!(!session.node().unwrap().is_running());
    assert!(!session.engine().unwrap().is_running());

    // Idempotent
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_modified_file_gets_new_identifier() {
    let root = TempDir::new().unwrap();
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let mut session = IpfsSession::new(test_config(&root), bus);
    session.start().await.unwrap();
    let file = session.content_dir().join("a.txt");

    std::fs::write(&file, b"hello").unwrap();
    let first = wait_for_content(&mut events, "a.txt", b"hello").await;

    std::fs::write(&file, b"world").unwrap();
    let second = wait_for_content(&mut events, "a.txt", b"world").await;
    assert_ne!(first, second);

    let node = session.node().unwrap();
    let cid = node.resolve_name("a.txt").unwrap();
    assert_eq!(node.cat(&cid).await.unwrap(), b"world");

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_preexisting_files_ingested_on_start() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    std::fs::create_dir_all(config.content_dir().join("docs")).unwrap();
    std::fs::write(config.content_dir().join("docs/readme.md"), b"# hi").unwrap();

    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let mut session = IpfsSession::new(config, bus);
    session.start().await.unwrap();

    wait_for_ingest(&mut events, "docs/readme.md").await;
    wait_for_event(&mut events, |e| *e == Event::ScanComplete).await;

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_returns_after_signal() {
    let root = TempDir::new().unwrap();
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let signal = ManualShutdown::new();
    signal.trigger();

    let mut session = IpfsSession::new(test_config(&root), bus);
    tokio::time::timeout(Duration::from_secs(10), session.run(&signal))
        .await
        .unwrap()
        .unwrap();

    wait_for_event(&mut events, |e| *e == Event::SessionStarted).await;
    wait_for_event(&mut events, |e| *e == Event::SessionStopped).await;
    assert_eq!(session.gateway_state(), EndpointState::Stopped);
}

#[tokio::test]
async fn test_run_ends_when_watch_root_removed() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let content_dir = config.content_dir();
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let handle = tokio::spawn(async move {
        let signal = ManualShutdown::new();
        let mut session = IpfsSession::new(config, bus);
        let result = session.run(&signal).await;
        (result, session)
    });

    wait_for_event(&mut events, |e| *e == Event::ScanComplete).await;
    std::fs::remove_dir_all(&content_dir).unwrap();

    let (result, session) = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SessionError::WatchLost(_))));
    assert!(!session.node().unwrap().is_running());
    assert_eq!(session.api_state(), EndpointState::Stopped);
}
