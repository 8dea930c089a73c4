//! Per-request context threaded through the pipeline stages.

use gateway_core::{Access, RouteMatch};

use super::auth::{AuthError, Identity};

/// State a request accumulates between route lookup and forwarding.
///
/// Created once per request and dropped with it; never shared.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The matched route and its captured path parameters
    pub route: RouteMatch,
    identity: Option<Identity>,
}

impl RequestContext {
    /// Start a context for a matched route
    #[must_use]
    pub fn new(route: RouteMatch) -> Self {
        Self {
            route,
            identity: None,
        }
    }

    /// Attach the identity resolved by the auth gate.
    pub fn attach(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Identity attached by the auth gate, if any
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether the matched route requires a verified caller
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.route.route.access == Access::Protected
    }

    /// Caller id of the verified identity.
    ///
    /// Fails with [`AuthError::MissingCredential`] when no identity is attached
    /// or the identity resolved to the empty or zero id.
    pub fn caller_id(&self) -> Result<&str, AuthError> {
        match self.identity {
            Some(ref identity) if !identity.is_anonymous() => Ok(&identity.subject),
            _ => Err(AuthError::MissingCredential),
        }
    }
}
