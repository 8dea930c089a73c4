//! Routing primitives for the API gateway.
//!
//! The route table is built once at startup and never mutated afterwards, so
//! it can be shared across request tasks without locking. Each entry maps an
//! inbound `(method, pattern)` pair to a backend [`Service`], an upstream path
//! template and the [`RelayMode`] used to carry the response back.
//!
//! Patterns use `:name` segments for path parameters:
//!
//! ```
//! use gateway_core::RouteTable;
//!
//! let table = RouteTable::standard();
//! let matched = table.lookup("GET", "/api/v1/files/42/download").unwrap();
//! assert_eq!(matched.param("id"), Some("42"));
//! assert_eq!(matched.upstream_path(), "/api/v1/files/42/download");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;

use serde::Serialize;

/// Backend service a route is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Accounts, profiles and credentials
    User,
    /// File storage
    File,
    /// Analytics jobs and reports
    Analytics,
}

impl Service {
    /// Stable lowercase name, used in config keys and log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::File => "file",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an upstream response is carried back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Read the whole upstream body, then reply with status, `Content-Type` and body.
    Buffered,
    /// Copy every upstream header, then stream the body as it arrives.
    Streaming,
}

/// Whether a route sits behind the auth gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// No credential required (login, register)
    Public,
    /// A verified identity is required before forwarding
    Protected,
}

/// What the gateway does with the inbound request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    /// No body is sent upstream.
    Empty,
    /// The inbound byte stream is forwarded as-is.
    Passthrough,
    /// A `multipart/form-data` upload, forwarded as-is once its framing is checked.
    Multipart,
    /// A JSON `{"url": ...}` payload, validated and re-serialized before forwarding.
    UrlPayload,
}

/// One row of the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteSpec {
    /// Inbound HTTP method (upper case)
    pub method: &'static str,
    /// Inbound path pattern, e.g. `/api/v1/files/:id`
    pub pattern: &'static str,
    /// Target backend
    pub service: Service,
    /// Upstream path template; parameters share names with `pattern`
    pub upstream: &'static str,
    /// Fixed upstream method; `None` mirrors the inbound method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_method: Option<&'static str>,
    /// Response relay mode
    pub relay: RelayMode,
    /// Auth requirement
    pub access: Access,
    /// Request body handling
    pub body: BodyKind,
}

impl RouteSpec {
    const fn new(
        method: &'static str,
        pattern: &'static str,
        service: Service,
        access: Access,
        body: BodyKind,
    ) -> Self {
        Self {
            method,
            pattern,
            service,
            upstream: pattern,
            upstream_method: None,
            relay: RelayMode::Buffered,
            access,
            body,
        }
    }

    const fn streaming(mut self) -> Self {
        self.relay = RelayMode::Streaming;
        self
    }

    const fn upstream_method(mut self, method: &'static str) -> Self {
        self.upstream_method = Some(method);
        self
    }

    /// Match `path` against this route's pattern, returning captured parameters.
    fn capture(&self, path: &str) -> Option<Vec<(&'static str, String)>> {
        let mut params = Vec::new();
        let mut pattern_segments = self.pattern.split('/');
        let mut path_segments = path.split('/');

        loop {
            match (pattern_segments.next(), path_segments.next()) {
                (None, None) => return Some(params),
                (Some(expected), Some(actual)) => {
                    if let Some(name) = expected.strip_prefix(':') {
                        if actual.is_empty() {
                            return None;
                        }
                        params.push((name, actual.to_string()));
                    } else if expected != actual {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    }
}

/// A route lookup hit: the matched row plus its captured path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The matched route
    pub route: RouteSpec,
    /// Captured `(name, value)` pairs, in pattern order
    pub params: Vec<(&'static str, String)>,
}

impl RouteMatch {
    /// Value of a captured path parameter
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Upstream path with every `:name` segment replaced by its captured value.
    ///
    /// Values are substituted verbatim (still percent-encoded as received).
    #[must_use]
    pub fn upstream_path(&self) -> String {
        self.route
            .upstream
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => self.param(name).unwrap_or_default(),
                None => segment,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Method to use upstream for a request that arrived with `inbound`.
    #[must_use]
    pub fn upstream_method<'a>(&self, inbound: &'a str) -> &'a str {
        self.route.upstream_method.unwrap_or(inbound)
    }
}

/// Immutable table of routes, searched in insertion order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: Vec<RouteSpec>,
}

impl RouteTable {
    /// Build a table from explicit rows. Earlier rows win on overlap.
    #[must_use]
    pub fn new(routes: Vec<RouteSpec>) -> Self {
        Self { routes }
    }

    /// The gateway's fixed route set.
    #[must_use]
    pub fn standard() -> Self {
        use Access::{Protected, Public};
        use BodyKind::{Empty, Multipart, Passthrough, UrlPayload};
        use Service::{Analytics, File, User};

        Self::new(vec![
            RouteSpec::new("POST", "/api/v1/auth/login", User, Public, Passthrough),
            RouteSpec::new("POST", "/api/v1/auth/register", User, Public, Passthrough),
            RouteSpec::new("GET", "/api/v1/users/profile", User, Protected, Empty),
            RouteSpec::new("PUT", "/api/v1/users/profile", User, Protected, Passthrough),
            RouteSpec::new("POST", "/api/v1/users/change-password", User, Protected, Passthrough),
            RouteSpec::new("POST", "/api/v1/files/upload", File, Protected, Multipart),
            RouteSpec::new("POST", "/api/v1/files/upload-url", File, Protected, UrlPayload),
            RouteSpec::new("GET", "/api/v1/files", File, Protected, Empty),
            RouteSpec::new("GET", "/api/v1/files/:id", File, Protected, Empty),
            RouteSpec::new("DELETE", "/api/v1/files/:id", File, Protected, Empty),
            RouteSpec::new("PUT", "/api/v1/files/:id/hide", File, Protected, Empty),
            RouteSpec::new("GET", "/api/v1/files/:id/download", File, Protected, Empty)
                .upstream_method("GET")
                .streaming(),
            RouteSpec::new("POST", "/api/v1/analytics/analyze", Analytics, Protected, Passthrough),
            RouteSpec::new("GET", "/api/v1/analytics/reports", Analytics, Protected, Empty),
            RouteSpec::new("GET", "/api/v1/analytics/reports/:id", Analytics, Protected, Empty),
            RouteSpec::new("DELETE", "/api/v1/analytics/reports/:id", Analytics, Protected, Empty),
        ])
    }

    /// Find the first route matching `method` and `path`.
    ///
    /// A path that matches a pattern under a different method is a miss,
    /// not a method error.
    #[must_use]
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method.eq_ignore_ascii_case(method))
            .find_map(|route| {
                route.capture(path).map(|params| RouteMatch {
                    route: *route,
                    params,
                })
            })
    }

    /// All rows, in lookup order
    #[must_use]
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
