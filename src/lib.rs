//! API Gateway Library
//!
//! Single entry point in front of the user, file and analytics services.
//!
//! # Features
//!
//! - **Static routing**: a fixed table of public and protected routes, see [`gateway_core::RouteTable`]
//! - **Bearer auth**: HS256 JWT verification with the caller identity carried per request
//! - **Forwarding**: header-preserving relay, buffered for JSON and streaming for downloads
//! - **Upload checks**: multipart and URL uploads validated before any backend work
//! - **Operations**: CORS, health check, request ids, structured logs, graceful shutdown
//!
//! # Request pipeline
//!
//! ```text
//! CORS -> route lookup -> auth gate (protected only) -> validation -> forward -> relay
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{ApiError, Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` of `"json"` selects
/// JSON lines; anything else is human-readable text.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
