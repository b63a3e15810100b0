//! HTTP response building helpers shared by the gateway, control API and
//! static file server.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::StoreError;

pub type HttpResponse = Response<Full<Bytes>>;

fn with_status(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    with_status(status, "application/json", Bytes::from(json))
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> HttpResponse {
    json_response(StatusCode::OK, body)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> HttpResponse {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message }),
    )
}

/// Build a 400 Bad Request response with message
pub fn bad_request(message: &str) -> HttpResponse {
    json_response(
        StatusCode::BAD_REQUEST,
        &serde_json::json!({ "error": message }),
    )
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> HttpResponse {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Convert a StoreError to an appropriate HTTP response
pub fn error_response(error: StoreError) -> HttpResponse {
    let (status, message) = match &error {
        StoreError::NotFound(cid) => (StatusCode::NOT_FOUND, format!("Block not found: {}", cid)),
        StoreError::InvalidCid(msg) => (StatusCode::BAD_REQUEST, format!("Invalid CID: {}", msg)),
        StoreError::Stopped => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Build a binary response; `len` is advertised even when the body is
/// omitted for HEAD
pub fn binary_response(
    content_type: &'static str,
    len: u64,
    body: Option<Vec<u8>>,
) -> HttpResponse {
    let body = body.map(Bytes::from).unwrap_or_default();
    let mut response = with_status(StatusCode::OK, content_type, body);
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response
}
