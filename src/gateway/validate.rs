//! Pre-forward request validation
//!
//! Upload routes are checked before any upstream work. A multipart upload
//! must declare a `multipart/form-data` body with a boundary; the parts
//! themselves stream through to the file service unparsed. A URL upload is
//! read (bounded by `server.max_body_size`), checked, and re-serialized as
//! the outbound body.

use axum::{
    body::{Body, to_bytes},
    http::{HeaderMap, HeaderValue, Request, header},
};
use gateway_core::BodyKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Why a request was rejected before forwarding. Every variant maps to 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Upload carried no multipart file payload
    #[error("File is required")]
    FileRequired,

    /// URL upload without a `url` field
    #[error("url is required")]
    UrlRequired,

    /// `url` is not an absolute http(s) URL
    #[error("url must be an absolute http or https URL")]
    InvalidUrl,

    /// Body is not a JSON object
    #[error("Invalid JSON body")]
    InvalidJson,

    /// Body exceeded the configured limit or could not be read
    #[error("Request body too large")]
    BodyTooLarge,
}

/// `POST /files/upload-url` body. Extra fields travel along untouched.
#[derive(Debug, Deserialize, Serialize)]
struct UrlPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Validate `request` for its route's body kind, returning the request to forward.
///
/// `Empty` and `Passthrough` bodies are returned unread.
pub async fn prepare(
    kind: BodyKind,
    request: Request<Body>,
    max_body_size: usize,
) -> Result<Request<Body>, ValidationError> {
    match kind {
        BodyKind::Empty | BodyKind::Passthrough => Ok(request),
        BodyKind::Multipart => {
            check_multipart(request.headers())?;
            Ok(request)
        }
        BodyKind::UrlPayload => {
            let (mut parts, body) = request.into_parts();
            let bytes = to_bytes(body, max_body_size)
                .await
                .map_err(|_| ValidationError::BodyTooLarge)?;
            let payload = check_url_payload(&bytes)?;
            parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
            Ok(Request::from_parts(parts, Body::from(payload)))
        }
    }
}

/// Require a `multipart/form-data` content type with a non-empty boundary.
pub fn check_multipart(headers: &HeaderMap) -> Result<(), ValidationError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(ValidationError::FileRequired)?;

    let mut params = content_type.split(';').map(str::trim);
    let essence = params.next().unwrap_or_default();
    if !essence.eq_ignore_ascii_case("multipart/form-data") {
        debug!(content_type, "Upload without multipart body");
        return Err(ValidationError::FileRequired);
    }

    let has_boundary = params.any(|param| {
        param
            .split_once('=')
            .is_some_and(|(k, v)| k.trim().eq_ignore_ascii_case("boundary") && !v.trim_matches('"').is_empty())
    });
    if has_boundary {
        Ok(())
    } else {
        Err(ValidationError::FileRequired)
    }
}

/// Parse a URL-upload body and return its re-serialized bytes.
pub fn check_url_payload(bytes: &[u8]) -> Result<Vec<u8>, ValidationError> {
    let payload: UrlPayload =
        serde_json::from_slice(bytes).map_err(|_| ValidationError::InvalidJson)?;

    let raw = payload
        .url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or(ValidationError::UrlRequired)?;

    let parsed = url::Url::parse(raw).map_err(|_| ValidationError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::InvalidUrl);
    }

    serde_json::to_vec(&payload).map_err(|_| ValidationError::InvalidJson)
}
