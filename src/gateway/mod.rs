//! Gateway server implementation

pub mod auth;
pub mod context;
pub mod cors;
pub mod forward;
mod router;
mod server;
pub mod validate;

pub use auth::{AuthError, AuthGate, Identity, IdentityVerifier};
pub use context::RequestContext;
pub use forward::{ForwardError, HttpForwarder, StatusPolicy, Upstream};
pub use router::{AppState, create_router};
pub use server::Gateway;
