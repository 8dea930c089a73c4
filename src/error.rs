//! Error types for the API gateway
//!
//! [`Error`] covers process-level failures (configuration, binding, client
//! construction). [`ApiError`] is the per-request taxonomy: every variant is
//! terminal for its request and renders as `{"error": "<message>"}` with a
//! status chosen here, so internal addresses and error chains never reach the
//! client.

use std::io;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::gateway::auth::AuthError;
use crate::gateway::forward::ForwardError;
use crate::gateway::validate::ValidationError;

/// Result type alias for the API gateway
pub type Result<T> = std::result::Result<T, Error>;

/// API gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Request-level failure, resolved to an HTTP response at the boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Credential missing, malformed, forged or expired
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Request rejected before forwarding
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No route for this method and path
    #[error("Not found")]
    RouteNotFound,

    /// Building, dispatching or relaying the upstream request failed
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Forward(e) => e.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));

        if matches!(self, Self::Auth(_)) {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
