//! HTTP router and the request pipeline
//!
//! Every request outside `/health` goes through one fallback handler:
//! route lookup, then the auth gate for protected routes, then body
//! validation, then the forwarding engine. The first failing stage ends the
//! request with its [`ApiError`].

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use gateway_core::RouteTable;
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::debug;

use super::auth::{AuthGate, IdentityVerifier};
use super::context::RequestContext;
use super::cors::cors_middleware;
use super::forward::{HttpForwarder, Upstream};
use super::validate;
use crate::config::Config;
use crate::{ApiError, Result};

/// Shared application state
pub struct AppState {
    /// Static route table
    pub routes: RouteTable,
    /// Credential check for protected routes
    pub gate: AuthGate,
    /// Forwarding engine
    pub upstream: Arc<dyn Upstream>,
    /// Limit for bodies the gateway has to read itself
    pub max_body_size: usize,
}

impl AppState {
    /// Build state around an explicit upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if no JWT secret is configured.
    pub fn new(config: &Config, upstream: Arc<dyn Upstream>) -> Result<Self> {
        Ok(Self {
            routes: RouteTable::standard(),
            gate: AuthGate::new(IdentityVerifier::from_config(&config.auth)?),
            upstream,
            max_body_size: config.server.max_body_size,
        })
    }

    /// Build state with the HTTP forwarder for the configured backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWT secret is missing, a backend URL is
    /// invalid, or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let forwarder = HttpForwarder::new(&config.upstreams, &config.forwarding)?;
        Self::new(config, Arc::new(forwarder))
    }

    /// Run one request through lookup, auth, validation and forwarding.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of the first stage that rejects the request.
    pub async fn dispatch(&self, request: Request<Body>) -> std::result::Result<Response, ApiError> {
        let route = self
            .routes
            .lookup(request.method().as_str(), request.uri().path())
            .ok_or_else(|| {
                debug!(method = %request.method(), path = %request.uri().path(), "No route");
                ApiError::RouteNotFound
            })?;

        let mut ctx = RequestContext::new(route);
        if ctx.is_protected() {
            self.gate.admit(&mut ctx, request.headers())?;
        }

        let request = validate::prepare(ctx.route.route.body, request, self.max_body_size).await?;
        self.upstream.forward(&ctx, request).await
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(gateway_handler)
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(cors_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true),
    }))
}

/// Fallback handler for every routed API request
async fn gateway_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    match state.dispatch(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{StatusCode, header};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::gateway::auth::tests::{SECRET, sign};

    /// Answers every forward with the caller id it saw.
    struct EchoCaller;

    #[async_trait]
    impl Upstream for EchoCaller {
        async fn forward(
            &self,
            ctx: &RequestContext,
            _request: Request<Body>,
        ) -> std::result::Result<Response, ApiError> {
            let caller = ctx.identity().map(|i| i.subject.clone());
            Ok(Json(json!({ "caller": caller })).into_response())
        }
    }

    fn app() -> Router {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(SECRET.to_string());
        let state = AppState::new(&config, Arc::new(EchoCaller)).unwrap();
        create_router(Arc::new(state))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok_with_rfc3339_time() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        let time = body["time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok(), "{time}");
        assert!(time.ends_with('Z'));
    }

    #[tokio::test]
    async fn unknown_route_is_404_json() {
        let response = app()
            .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn public_route_skips_gate() {
        let response = app()
            .oneshot(
                Request::post("/api/v1/auth/login")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"caller": null}));
    }

    #[tokio::test]
    async fn protected_route_carries_identity_to_upstream() {
        let token = sign(&json!({"sub": "u-5", "exp": u64::MAX / 2}), SECRET);
        let response = app()
            .oneshot(
                Request::get("/api/v1/analytics/reports")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"caller": "u-5"}));
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key("x-request-id"));
    }
}
