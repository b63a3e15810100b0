//! Integration tests for the static file server

mod common;

use common::http_request;
use pinwatch::{EndpointState, EventBus, ManualShutdown, StaticFileServer};
use std::time::Duration;
use tempfile::TempDir;

async fn start_server(dir: &TempDir) -> StaticFileServer {
    let root = dir.path().join("http");
    StaticFileServer::start(&root, 0, EventBus::new()).await.unwrap()
}

#[tokio::test]
async fn test_start_creates_root_and_serves_files() {
    let dir = TempDir::new().unwrap();
    let mut server = start_server(&dir).await;
    assert!(dir.path().join("http").is_dir());

    std::fs::write(server.root().join("index.html"), b"<h1>home</h1>").unwrap();
    std::fs::create_dir(server.root().join("docs")).unwrap();
    std::fs::write(server.root().join("docs/a.txt"), b"alpha").unwrap();

    let addr = server.local_addr().unwrap();

    let resp = http_request(addr, "GET", "/", b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"<h1>home</h1>");
    assert_eq!(
        resp.header("content-type").as_deref(),
        Some("application/octet-stream")
    );

    let resp = http_request(addr, "GET", "/docs/a.txt", b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"alpha");

    let resp = http_request(addr, "HEAD", "/docs/a.txt", b"").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-length").as_deref(), Some("5"));
    assert!(resp.body.is_empty());

    let resp = http_request(addr, "GET", "/docs/missing.txt", b"").await;
    assert_eq!(resp.status, 404);

    let resp = http_request(addr, "POST", "/docs/a.txt", b"x").await;
    assert_eq!(resp.status, 405);

    server.stop().await.unwrap();
    assert_eq!(server.state(), EndpointState::Stopped);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_parent_traversal_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"top secret").unwrap();
    let mut server = start_server(&dir).await;
    let addr = server.local_addr().unwrap();

    for target in [
        "/../secret.txt",
        "/docs/../../secret.txt",
        "/%2e%2e/secret.txt",
        "/..%2fsecret.txt",
    ] {
        let resp = http_request(addr, "GET", target, b"").await;
        assert_eq!(resp.status, 404, "{} should not be served", target);
        assert!(!resp.body.windows(6).any(|w| w == b"secret"));
    }

    server.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"top secret").unwrap();
    let mut server = start_server(&dir).await;
    std::os::unix::fs::symlink(
        dir.path().join("secret.txt"),
        server.root().join("link.txt"),
    )
    .unwrap();

    let resp = http_request(server.local_addr().unwrap(), "GET", "/link.txt", b"").await;
    assert_eq!(resp.status, 404);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_port_in_use_fails_to_start() {
    let dir = TempDir::new().unwrap();
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let result = StaticFileServer::start(&dir.path().join("http"), port, EventBus::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_until_serves_then_stops_on_signal() {
    let dir = TempDir::new().unwrap();
    let mut server = start_server(&dir).await;
    std::fs::write(server.root().join("a.txt"), b"alpha").unwrap();
    let addr = server.local_addr().unwrap();
    let signal = ManualShutdown::new();

    let client = async {
        let resp = http_request(addr, "GET", "/a.txt", b"").await;
        signal.trigger();
        resp
    };
    let (served, resp) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(server.run_until(Duration::ZERO, &signal), client) },
    )
    .await
    .unwrap();

    served.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"alpha");
    assert_eq!(server.state(), EndpointState::Stopped);
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
        .await
        .is_err());
}
