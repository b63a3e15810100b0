//! Static file server for `serve http`
//!
//! Serves files beneath one directory over HTTP/1 as
//! `application/octet-stream`. Only `GET` and `HEAD` are answered; a
//! directory serves its `index.html`. Request paths that
//! climb above the root, or resolve outside it through a symlink, are
//! answered with 404.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointKind, EndpointState, Http, HttpHandler, ServiceEndpoint};
use crate::error::SessionError;
use crate::events::EventBus;
use crate::response::{self, HttpResponse};
use crate::signal::ShutdownSignal;

const CONTENT_TYPE: &str = "application/octet-stream";

/// Running static file server
pub struct StaticFileServer {
    root: PathBuf,
    endpoint: ServiceEndpoint,
}

impl StaticFileServer {
    /// Create `root` if needed and start serving it on `port` (all interfaces)
    pub async fn start(root: &Path, port: u16, events: EventBus) -> Result<Self, SessionError> {
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let mut endpoint = ServiceEndpoint::new(EndpointKind::StaticHttp, bind_addr, events);
        let handler = StaticHandler { root: root.clone() };
        endpoint.start(Arc::new(Http(Arc::new(handler)))).await?;

        Ok(Self { root, endpoint })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> EndpointState {
        self.endpoint.state()
    }

    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.endpoint.stop().await
    }

    /// Wait `settle_delay`, serve until `signal` fires, then stop
    pub async fn run_until(
        &mut self,
        settle_delay: Duration,
        signal: &dyn ShutdownSignal,
    ) -> Result<(), SessionError> {
        tokio::time::sleep(settle_delay).await;
        info!(
            root = %self.root.display(),
            addr = ?self.local_addr(),
            "Static file server ready"
        );
        signal.await_shutdown_signal().await;
        self.stop().await
    }
}

/// Map a raw request path onto `root`.
///
/// The path is percent-decoded, empty and `.` segments are skipped and `..`
/// pops one level. Climbing above `root` is a [`SessionError::Traversal`].
/// The result is lexical only; symlinks are checked by the caller.
pub fn resolve_request_path(root: &Path, raw_path: &str) -> Result<PathBuf, SessionError> {
    let decoded = urlencoding::decode(raw_path)
        .map_err(|_| SessionError::Traversal(raw_path.to_string()))?;

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if depth == 0 {
                    return Err(SessionError::Traversal(raw_path.to_string()));
                }
                resolved.pop();
                depth -= 1;
            }
            s if s.contains('\\') || s.contains('\0') => {
                return Err(SessionError::Traversal(raw_path.to_string()));
            }
            s => {
                resolved.push(s);
                depth += 1;
            }
        }
    }
    Ok(resolved)
}

struct StaticHandler {
    /// Canonical
    root: PathBuf,
}

impl StaticHandler {
    /// Canonical file to serve for `path`, if it exists inside the root
    async fn locate(&self, path: &Path) -> Option<PathBuf> {
        let canonical = tokio::fs::canonicalize(path).await.ok()?;
        if !canonical.starts_with(&self.root) {
            warn!(path = %path.display(), "Symlink leads outside the served root");
            return None;
        }

        let metadata = tokio::fs::metadata(&canonical).await.ok()?;
        if metadata.is_file() {
            return Some(canonical);
        }
        if metadata.is_dir() {
            let index = tokio::fs::canonicalize(canonical.join("index.html")).await.ok()?;
            let is_file = tokio::fs::metadata(&index).await.ok()?.is_file();
            if is_file && index.starts_with(&self.root) {
                return Some(index);
            }
        }
        None
    }

    async fn serve_file(&self, method: &Method, file: &Path) -> HttpResponse {
        let result = if *method == Method::HEAD {
            tokio::fs::metadata(file).await.map(|m| (m.len(), None))
        } else {
            tokio::fs::read(file)
                .await
                .map(|data| (data.len() as u64, Some(data)))
        };

        match result {
            Ok((len, body)) => response::binary_response(CONTENT_TYPE, len, body),
            Err(e) => {
                debug!(file = %file.display(), error = %e, "Unreadable file");
                response::not_found("Not Found")
            }
        }
    }
}

#[async_trait]
impl HttpHandler for StaticHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return response::method_not_allowed();
        }

        let path = match resolve_request_path(&self.root, req.uri().path()) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Rejected request path");
                return response::not_found("Not Found");
            }
        };

        match self.locate(&path).await {
            Some(file) => self.serve_file(&method, &file).await,
            None => response::not_found("Not Found"),
        }
    }
}
