//! HTTP retrieval gateway
//!
//! - `GET  /ipfs/{cid}` - Block bytes
//! - `HEAD /ipfs/{cid}` - Block size only
//! - `GET  /health`     - Store statistics

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

use crate::endpoint::HttpHandler;
use crate::error::StoreError;
use crate::node::{ContentStore, StoreNode};
use crate::response::{self, HttpResponse};

/// Gateway request handler
pub struct GatewayHandler {
    node: Arc<StoreNode>,
}

impl GatewayHandler {
    pub fn new(node: Arc<StoreNode>) -> Self {
        Self { node }
    }

    async fn handle_block(&self, method: &Method, raw_cid: &str) -> HttpResponse {
        // Trailing path segments are not supported on raw blocks
        let raw_cid = raw_cid.trim_end_matches('/');
        if raw_cid.is_empty() || raw_cid.contains('/') {
            return response::not_found("Only /ipfs/{cid} is served");
        }

        let cid = match raw_cid.parse::<Cid>() {
            Ok(cid) => cid,
            Err(e) => return response::error_response(StoreError::InvalidCid(e.to_string())),
        };

        let result = if *method == Method::HEAD {
            self.node.block_size(&cid).await.map(|len| (len, None))
        } else {
            self.node
                .cat(&cid)
                .await
                .map(|data| (data.len() as u64, Some(data)))
        };

        match result {
            Ok((len, body)) => {
                debug!(%cid, len, "Serving block");
                let mut resp = response::binary_response("application/octet-stream", len, body);
                immutable_headers(resp.headers_mut(), &cid);
                resp
            }
            Err(e) => response::error_response(e),
        }
    }

    async fn handle_health(&self) -> HttpResponse {
        match self.node.stats().await {
            Ok(stats) => response::ok(&serde_json::json!({
                "status": if self.node.is_running() { "ok" } else { "stopping" },
                "blocks": stats.total_blocks,
                "bytes": stats.total_bytes,
                "names": stats.names,
            })),
            Err(e) => response::error_response(e),
        }
    }
}

fn immutable_headers(headers: &mut HeaderMap, cid: &Cid) {
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", cid)) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
}

#[async_trait]
impl HttpHandler for GatewayHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match (method.clone(), path.as_str()) {
            (Method::GET, "/health") => self.handle_health().await,
            (Method::GET, p) | (Method::HEAD, p) if p.starts_with("/ipfs/") => {
                let cid = p.strip_prefix("/ipfs/").unwrap_or("");
                self.handle_block(&method, cid).await
            }
            (_, p) if p.starts_with("/ipfs/") => response::method_not_allowed(),
            _ => response::not_found("Not Found"),
        }
    }
}
