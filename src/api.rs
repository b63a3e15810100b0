//! Control API
//!
//! IPFS-style RPC; every route is a `POST` with arguments in the query string:
//!
//! - `/api/v0/add[?path=]`         - Store the request body, optionally under a name
//! - `/api/v0/cat?arg={cid}`       - Block bytes
//! - `/api/v0/block/stat?arg={cid}`- Block size
//! - `/api/v0/name/ls`             - All published names
//! - `/api/v0/name/resolve?arg=`   - CID currently published under a name
//! - `/api/v0/id`                  - Node addresses
//! - `/api/v0/version`             - Daemon version

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::endpoint::HttpHandler;
use crate::error::StoreError;
use crate::node::StoreNode;
use crate::response::{self, HttpResponse};

#[derive(Debug, Default, Deserialize)]
struct ApiQuery {
    arg: Option<String>,
    path: Option<String>,
}

impl ApiQuery {
    fn parse(query: Option<&str>) -> Result<Self, HttpResponse> {
        match query {
            Some(q) => serde_urlencoded::from_str(q)
                .map_err(|e| response::bad_request(&format!("Bad query string: {}", e))),
            None => Ok(Self::default()),
        }
    }

    fn cid(&self) -> Result<Cid, HttpResponse> {
        let arg = self
            .arg
            .as_deref()
            .ok_or_else(|| response::bad_request("Missing argument \"arg\""))?;
        // Accept both "bafk..." and "/ipfs/bafk..."
        let raw = arg.strip_prefix("/ipfs/").unwrap_or(arg);
        raw.parse::<Cid>()
            .map_err(|e| response::error_response(StoreError::InvalidCid(e.to_string())))
    }
}

/// Control API request handler
pub struct ApiHandler {
    node: Arc<StoreNode>,
}

impl ApiHandler {
    pub fn new(node: Arc<StoreNode>) -> Self {
        Self { node }
    }

    async fn route(&self, req: Request<Incoming>) -> Result<HttpResponse, HttpResponse> {
        let path = req.uri().path().to_string();
        let query = ApiQuery::parse(req.uri().query())?;

        match path.as_str() {
            "/api/v0/add" => {
                let body = req
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| response::bad_request(&format!("Failed to read body: {}", e)))?
                    .to_bytes();

                let name = query.path.as_deref().filter(|p| !p.is_empty());
                let receipt = self
                    .node
                    .add(name, &body)
                    .await
                    .map_err(response::error_response)?;

                info!(cid = %receipt.cid, size = receipt.size, name = ?name, "Added via API");
                Ok(response::ok(&serde_json::json!({
                    "Name": name.unwrap_or_default(),
                    "Hash": receipt.cid.to_string(),
                    "Size": receipt.size.to_string(),
                })))
            }
            "/api/v0/cat" => {
                let cid = query.cid()?;
                let data = self.node.cat(&cid).await.map_err(response::error_response)?;
                Ok(response::binary_response(
                    "application/octet-stream",
                    data.len() as u64,
                    Some(data),
                ))
            }
            "/api/v0/block/stat" => {
                let cid = query.cid()?;
                let size = self
                    .node
                    .block_size(&cid)
                    .await
                    .map_err(response::error_response)?;
                Ok(response::ok(&serde_json::json!({
                    "Key": cid.to_string(),
                    "Size": size,
                })))
            }
            "/api/v0/name/ls" => Ok(response::ok(&serde_json::json!({
                "Names": self.node.names(),
            }))),
            "/api/v0/name/resolve" => {
                let name = query
                    .arg
                    .as_deref()
                    .ok_or_else(|| response::bad_request("Missing argument \"arg\""))?;
                match self.node.resolve_name(name) {
                    Some(cid) => Ok(response::ok(&serde_json::json!({
                        "Path": format!("/ipfs/{}", cid),
                    }))),
                    None => Err(response::not_found(&format!("No record for {}", name))),
                }
            }
            "/api/v0/id" => Ok(response::ok(&serde_json::json!({
                "Addresses": [self.node.swarm_addr().to_string()],
                "Repo": self.node.repo_dir().display().to_string(),
            }))),
            "/api/v0/version" => Ok(response::ok(&serde_json::json!({
                "Version": env!("CARGO_PKG_VERSION"),
                "System": std::env::consts::OS,
            }))),
            _ => Err(response::not_found("Unknown API command")),
        }
    }
}

#[async_trait]
impl HttpHandler for ApiHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        debug!(method = %req.method(), path = %req.uri().path(), "API request");

        if *req.method() != Method::POST {
            return response::method_not_allowed();
        }

        match self.route(req).await {
            Ok(resp) | Err(resp) => resp,
        }
    }
}
