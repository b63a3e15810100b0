//! Shared helpers for integration tests

#![allow(dead_code)]

use pinwatch::Event;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

/// Minimal HTTP/1.1 response
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Send one request with `Connection: close` and read the whole response.
/// The target is sent verbatim so tests can send unnormalized paths.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    target: &str,
    body: &[u8],
) -> RawResponse {
    let addr = SocketAddr::from(([127, 0, 0, 1], addr.port()));
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        method,
        target,
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("response has no status code");
    let headers = head.lines().skip(1).collect::<Vec<_>>().join("\n");

    RawResponse {
        status,
        headers,
        body,
    }
}

/// Wait up to ten seconds for an event matching `pred`
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait for the `Ingested` event of `entry` and return its CID
pub async fn wait_for_ingest(events: &mut broadcast::Receiver<Event>, entry: &str) -> String {
    let event = wait_for_event(events, |e| {
        matches!(e, Event::Ingested { entry: got, .. } if got == entry)
    })
    .await;
    match event {
        Event::Ingested { cid, .. } => cid,
        _ => unreachable!(),
    }
}

/// Wait until `entry` has been ingested with exactly `content`. Earlier
/// ingests may have read a partially written file.
pub async fn wait_for_content(
    events: &mut broadcast::Receiver<Event>,
    entry: &str,
    content: &[u8],
) -> String {
    let expected = pinwatch::BlobStore::compute_cid(content).to_string();
    loop {
        let cid = wait_for_ingest(events, entry).await;
        if cid == expected {
            return cid;
        }
    }
}
