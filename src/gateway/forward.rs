//! Forwarding engine
//!
//! Rebuilds a validated inbound request against the backend that owns its
//! route, then relays the backend response:
//!
//! - **Buffered**: status, `Content-Type` and the complete body.
//! - **Streaming**: status, end-to-end headers and the body as it arrives.
//!   Dropping the response (client went away) drops the backend stream.
//!
//! Backend failures never leak addresses or error chains to the client; the
//! detail goes to the log and the client sees a fixed message.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Method, Request, StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use gateway_core::{BodyKind, RelayMode, Service};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::context::RequestContext;
use crate::config::{ForwardingConfig, UpstreamsConfig};
use crate::{ApiError, Error, Result};

/// How gateway-originated backend failures map to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Every failure is a 500
    #[default]
    Uniform,
    /// Unreachable backend is a 502, timeout a 504
    Distinct,
}

/// Failure building, dispatching or relaying an upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// The outbound request could not be constructed
    #[error("Failed to create request")]
    InternalError,

    /// Connection refused, reset, DNS failure and the like
    #[error("Failed to forward request")]
    UpstreamUnavailable(StatusPolicy),

    /// The backend did not answer within `forwarding.request_timeout`
    #[error("Failed to forward request")]
    UpstreamTimeout(StatusPolicy),

    /// The backend answered but its body could not be read
    #[error("Failed to read response")]
    UpstreamReadError,
}

impl ForwardError {
    /// HTTP status for this failure
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamUnavailable(StatusPolicy::Distinct) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(StatusPolicy::Distinct) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A backend the gateway can forward to.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward a validated request for `ctx.route` and relay the response.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the route is protected but no usable
    /// identity is attached, or when the backend exchange fails.
    async fn forward(
        &self,
        ctx: &RequestContext,
        request: Request<Body>,
    ) -> std::result::Result<Response, ApiError>;
}

/// Headers that describe a single hop and are never relayed downstream.
static HOP_BY_HOP: [HeaderName; 5] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// [`Upstream`] backed by a pooled `reqwest` client.
pub struct HttpForwarder {
    client: Client,
    upstreams: UpstreamsConfig,
    request_timeout: Duration,
    policy: StatusPolicy,
}

impl HttpForwarder {
    /// Create a forwarder for the configured backends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a backend base URL does not parse, or
    /// [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(upstreams: &UpstreamsConfig, config: &ForwardingConfig) -> Result<Self> {
        for service in [Service::User, Service::File, Service::Analytics] {
            let base = upstreams.base_url(service);
            reqwest::Url::parse(base).map_err(|e| {
                Error::Config(format!("upstreams.{service}: invalid base URL '{base}': {e}"))
            })?;
        }

        // Redirects are relayed to the client, not followed.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            upstreams: upstreams.clone(),
            request_timeout: config.request_timeout,
            policy: if config.distinct_gateway_status {
                StatusPolicy::Distinct
            } else {
                StatusPolicy::Uniform
            },
        })
    }

    /// Absolute backend URL for the matched route.
    fn target_url(&self, ctx: &RequestContext) -> std::result::Result<reqwest::Url, ForwardError> {
        let base = self.upstreams.base_url(ctx.route.route.service);
        let url = format!("{}{}", base.trim_end_matches('/'), ctx.route.upstream_path());
        reqwest::Url::parse(&url).map_err(|e| {
            error!(url = %url, error = %e, "Cannot build upstream URL");
            ForwardError::InternalError
        })
    }

    fn build(
        &self,
        ctx: &RequestContext,
        request: Request<Body>,
    ) -> std::result::Result<reqwest::Request, ForwardError> {
        let route = &ctx.route.route;
        let url = self.target_url(ctx)?;
        let method = Method::from_bytes(ctx.route.upstream_method(request.method().as_str()).as_bytes())
            .map_err(|_| ForwardError::InternalError)?;

        let (parts, body) = request.into_parts();
        let headers = outbound_headers(&parts.headers, route.body);

        let builder = self.client.request(method, url).headers(headers);
        let builder = match route.body {
            BodyKind::Empty => builder,
            _ => builder.body(reqwest::Body::wrap_stream(body.into_data_stream())),
        };

        builder.build().map_err(|e| {
            error!(route = %route.pattern, error = %e, "Failed to create upstream request");
            ForwardError::InternalError
        })
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, ForwardError> {
        let service = ctx.route.route.service;
        match tokio::time::timeout(self.request_timeout, self.client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => {
                warn!(%service, error = %e, "Upstream timed out");
                Err(ForwardError::UpstreamTimeout(self.policy))
            }
            Ok(Err(e)) => {
                warn!(%service, error = %e, "Upstream unavailable");
                Err(ForwardError::UpstreamUnavailable(self.policy))
            }
            Err(_) => {
                warn!(%service, timeout = ?self.request_timeout, "Upstream timed out");
                Err(ForwardError::UpstreamTimeout(self.policy))
            }
        }
    }

    async fn relay_buffered(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<Response, ForwardError> {
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

        let body = match tokio::time::timeout(self.request_timeout, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read upstream response");
                return Err(ForwardError::UpstreamReadError);
            }
            Err(_) => {
                warn!(timeout = ?self.request_timeout, "Timed out reading upstream response");
                return Err(ForwardError::UpstreamReadError);
            }
        };

        let mut builder = Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder
            .body(Body::from(body))
            .map_err(|_| ForwardError::InternalError)
    }

    fn relay_streaming(response: reqwest::Response) -> std::result::Result<Response, ForwardError> {
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let stream = response
            .bytes_stream()
            .inspect_err(|e| warn!(error = %e, "Upstream stream aborted"));

        let mut relayed = Response::builder()
            .status(status)
            .body(Body::from_stream(stream))
            .map_err(|_| ForwardError::InternalError)?;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

#[async_trait]
impl Upstream for HttpForwarder {
    async fn forward(
        &self,
        ctx: &RequestContext,
        request: Request<Body>,
    ) -> std::result::Result<Response, ApiError> {
        if ctx.is_protected() {
            ctx.caller_id()?;
        }

        let outbound = self.build(ctx, request)?;
        debug!(
            service = %ctx.route.route.service,
            method = %outbound.method(),
            path = %outbound.url().path(),
            "Forwarding request"
        );

        let response = self.dispatch(ctx, outbound).await?;
        let relayed = match ctx.route.route.relay {
            RelayMode::Buffered => self.relay_buffered(response).await?,
            RelayMode::Streaming => Self::relay_streaming(response)?,
        };
        Ok(relayed)
    }
}

/// Inbound headers as they go to the backend.
///
/// Everything is copied except `Host` (the client sets it for the target) and
/// hop-by-hop framing. `Content-Length` is dropped for bodiless routes.
fn outbound_headers(inbound: &HeaderMap, body: BodyKind) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::HOST);
    strip_hop_by_hop(&mut headers);
    if body == BodyKind::Empty {
        headers.remove(header::CONTENT_LENGTH);
    }
    headers
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
