//! Bearer credential verification and the auth gate
//!
//! Tokens are HS256 JWTs signed with the shared secret from `auth.jwt_secret`.
//!
//! # Verification
//!
//! 1. Split the `Authorization` header into scheme and token; anything but
//!    `Bearer <token>` is malformed.
//! 2. Verify the signature (and `iss`/`aud` when configured) with `jsonwebtoken`.
//! 3. Compare `exp`/`nbf` against the verifier's wall clock. The configured
//!    leeway defaults to zero, so a token is rejected from its `exp` second on.
//! 4. Resolve the caller id from `sub`, falling back to a legacy `user_id`.
//!
//! The gate only resolves an identity. Rejecting an identity that resolved to
//! the empty or zero id is left to the forwarding engine, which refuses to
//! send such a request to a protected route.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::context::RequestContext;
use crate::config::AuthConfig;
use crate::{Error, Result};

/// Why a credential was refused. Every variant maps to HTTP 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header, or an identity that resolved to nothing
    #[error("Unauthorized")]
    MissingCredential,

    /// Header present but not `Bearer <token>`, or the token is not a JWT
    #[error("Malformed authorization header")]
    MalformedCredential,

    /// Signature, issuer, audience or `nbf` check failed
    #[error("Invalid token")]
    InvalidCredential,

    /// `exp` has passed
    #[error("Token expired")]
    ExpiredCredential,
}

/// Caller identity resolved from a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Opaque caller id (`sub`, or legacy numeric `user_id`)
    pub subject: String,
    /// Role claims, if any
    pub roles: Vec<String>,
    /// Email claim, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `exp` claim (Unix seconds)
    pub expires_at: u64,
}

impl Identity {
    /// Whether this identity carries a usable caller id.
    ///
    /// The empty string and `"0"` are the "no identity" sentinels.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.subject.is_empty() || self.subject == "0"
    }

    /// Check for a role claim
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Caller id claim: numeric in older tokens, string in newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdClaim {
    Number(u64),
    Text(String),
}

impl IdClaim {
    fn to_subject(&self) -> String {
        match self {
            Self::Number(id) => id.to_string(),
            Self::Text(id) => id.clone(),
        }
    }
}

/// Raw JWT claims.
///
/// Presence of `exp`, `iss` and `aud` is checked in `verify_at`, so a
/// well-formed token that omits one is invalid rather than malformed.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<IdClaim>,
    #[serde(default)]
    user_id: Option<IdClaim>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    iss: Option<serde_json::Value>,
    #[serde(default)]
    aud: Option<serde_json::Value>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    email: Option<String>,
}

impl Claims {
    fn subject(&self) -> String {
        match (&self.sub, &self.user_id) {
            (Some(IdClaim::Text(sub)), _) if !sub.is_empty() => sub.clone(),
            (Some(IdClaim::Number(sub)), _) => sub.to_string(),
            (_, Some(id)) => id.to_subject(),
            _ => String::new(),
        }
    }
}

/// Validates bearer credentials and extracts the caller identity.
///
/// Holds no mutable state; one instance is shared by all requests.
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
    leeway: u64,
    require_iss: bool,
    require_aud: bool,
}

impl IdentityVerifier {
    /// Build a verifier for HS256 tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8], config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time claims are checked against our own clock in `verify_at`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        let mut required = vec!["exp"];
        if config.issuer.is_some() {
            required.push("iss");
        }
        if config.audience.is_some() {
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match config.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            leeway: config.leeway.as_secs(),
            require_iss: config.issuer.is_some(),
            require_aud: config.audience.is_some(),
        }
    }

    /// Build a verifier from configuration, resolving the signing secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no secret is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = config.resolve_jwt_secret().ok_or_else(|| {
            Error::Config("auth.jwt_secret is not set (set JWT_SECRET or auth.jwt_secret)".into())
        })?;
        Ok(Self::new(secret.as_bytes(), config))
    }

    /// Verify the raw `Authorization` header value against the current time.
    pub fn verify(&self, authorization: Option<&str>) -> std::result::Result<Identity, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        self.verify_at(authorization, now)
    }

    /// Verify the raw `Authorization` header value as of `now` (Unix seconds).
    pub fn verify_at(
        &self,
        authorization: Option<&str>,
        now: u64,
    ) -> std::result::Result<Identity, AuthError> {
        let token = bearer_token(authorization)?;

        let claims = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| classify(e.kind()))?
            .claims;

        if (self.require_iss && claims.iss.is_none()) || (self.require_aud && claims.aud.is_none()) {
            return Err(AuthError::InvalidCredential);
        }
        let exp = claims.exp.ok_or(AuthError::InvalidCredential)?;
        if now >= exp.saturating_add(self.leeway) {
            return Err(AuthError::ExpiredCredential);
        }
        if claims.nbf.is_some_and(|nbf| now.saturating_add(self.leeway) < nbf) {
            return Err(AuthError::InvalidCredential);
        }

        Ok(Identity {
            subject: claims.subject(),
            roles: claims.roles,
            email: claims.email,
            expires_at: exp,
        })
    }
}

/// Extract the token from a `Bearer <token>` header value.
fn bearer_token(authorization: Option<&str>) -> std::result::Result<&str, AuthError> {
    let value = authorization
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingCredential)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MalformedCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedCredential);
    }

    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        return Err(AuthError::MalformedCredential);
    }
    Ok(token)
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedCredential,
        ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
        _ => AuthError::InvalidCredential,
    }
}

/// Request-pipeline stage guarding protected routes.
pub struct AuthGate {
    verifier: IdentityVerifier,
}

impl AuthGate {
    /// Create a gate around a verifier
    #[must_use]
    pub fn new(verifier: IdentityVerifier) -> Self {
        Self { verifier }
    }

    /// Verify the request's credential and attach the identity to `ctx`.
    ///
    /// On error the caller must stop the pipeline; nothing is attached.
    pub fn admit(
        &self,
        ctx: &mut RequestContext,
        headers: &HeaderMap,
    ) -> std::result::Result<(), AuthError> {
        let pattern = ctx.route.route.pattern;

        // A header that is not visible ASCII cannot carry a bearer token.
        let authorization = match headers.get(header::AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| {
                warn!(route = %pattern, "Authorization header is not valid ASCII");
                AuthError::MalformedCredential
            })?),
            None => None,
        };

        match self.verifier.verify(authorization) {
            Ok(identity) => {
                debug!(route = %pattern, caller = %identity.subject, "Authenticated request");
                ctx.attach(identity);
                Ok(())
            }
            Err(e) => {
                warn!(route = %pattern, reason = %e, "Rejected credential");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gateway_core::RouteTable;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};

    pub(crate) const SECRET: &str = "unit-test-secret";
    const NOW: u64 = 1_750_000_000;

    pub(crate) fn sign(claims: &Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier() -> IdentityVerifier {
        IdentityVerifier::new(SECRET.as_bytes(), &AuthConfig::default())
    }

    fn bearer(claims: &Value) -> String {
        format!("Bearer {}", sign(claims, SECRET))
    }

    #[test]
    fn valid_token_yields_identity() {
        let header = bearer(&json!({
            "sub": "user-17",
            "exp": NOW + 60,
            "roles": ["admin"],
            "email": "a@example.com"
        }));

        let identity = verifier().verify_at(Some(&header), NOW).unwrap();

        assert_eq!(identity.subject, "user-17");
        assert!(identity.has_role("admin"));
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert_eq!(identity.expires_at, NOW + 60);
        assert!(!identity.is_anonymous());
    }

    #[test]
    fn verification_is_deterministic_within_window() {
        let header = bearer(&json!({"sub": "42", "exp": NOW + 600}));
        let v = verifier();

        let first = v.verify_at(Some(&header), NOW).unwrap();
        let second = v.verify_at(Some(&header), NOW + 300).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn legacy_numeric_user_id_is_accepted() {
        let header = bearer(&json!({"user_id": 1234, "exp": NOW + 60}));
        let identity = verifier().verify_at(Some(&header), NOW).unwrap();
        assert_eq!(identity.subject, "1234");
    }

    #[test]
    fn zero_user_id_resolves_to_anonymous_identity() {
        // The gate lets it through; the forwarding engine rejects it.
        let header = bearer(&json!({"user_id": 0, "exp": NOW + 60}));
        let identity = verifier().verify_at(Some(&header), NOW).unwrap();
        assert!(identity.is_anonymous());
    }

    #[test]
    fn missing_header_is_missing_credential() {
        assert_eq!(verifier().verify_at(None, NOW), Err(AuthError::MissingCredential));
        assert_eq!(verifier().verify_at(Some("  "), NOW), Err(AuthError::MissingCredential));
    }

    #[test]
    fn wrong_scheme_is_malformed() {
        assert_eq!(
            verifier().verify_at(Some("Basic dXNlcjpwYXNz"), NOW),
            Err(AuthError::MalformedCredential)
        );
        assert_eq!(
            verifier().verify_at(Some("Bearer"), NOW),
            Err(AuthError::MalformedCredential)
        );
        assert_eq!(
            verifier().verify_at(Some("Bearer a b"), NOW),
            Err(AuthError::MalformedCredential)
        );
    }

    #[test]
    fn non_jwt_token_is_malformed() {
        assert_eq!(
            verifier().verify_at(Some("Bearer not-a-jwt"), NOW),
            Err(AuthError::MalformedCredential)
        );
    }

    #[test]
    fn lowercase_scheme_is_accepted() {
        let token = sign(&json!({"sub": "7", "exp": NOW + 60}), SECRET);
        let identity = verifier()
            .verify_at(Some(&format!("bearer {token}")), NOW)
            .unwrap();
        assert_eq!(identity.subject, "7");
    }

    #[test]
    fn forged_signature_is_invalid() {
        let token = sign(&json!({"sub": "7", "exp": NOW + 60}), "some-other-secret");
        assert_eq!(
            verifier().verify_at(Some(&format!("Bearer {token}")), NOW),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn token_is_expired_from_its_exp_second() {
        let header = bearer(&json!({"sub": "7", "exp": NOW}));
        let v = verifier();

        assert!(v.verify_at(Some(&header), NOW - 1).is_ok());
        assert_eq!(v.verify_at(Some(&header), NOW), Err(AuthError::ExpiredCredential));
    }

    #[test]
    fn configured_leeway_extends_window() {
        let config = AuthConfig {
            leeway: Duration::from_secs(30),
            ..AuthConfig::default()
        };
        let v = IdentityVerifier::new(SECRET.as_bytes(), &config);
        let header = bearer(&json!({"sub": "7", "exp": NOW}));

        assert!(v.verify_at(Some(&header), NOW + 29).is_ok());
        assert_eq!(v.verify_at(Some(&header), NOW + 30), Err(AuthError::ExpiredCredential));
    }

    #[test]
    fn token_before_nbf_is_invalid() {
        let header = bearer(&json!({"sub": "7", "exp": NOW + 600, "nbf": NOW + 60}));
        assert_eq!(
            verifier().verify_at(Some(&header), NOW),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn token_without_exp_is_invalid() {
        let header = bearer(&json!({"sub": "7"}));
        assert_eq!(
            verifier().verify_at(Some(&header), NOW),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn issuer_is_enforced_when_configured() {
        let config = AuthConfig {
            issuer: Some("https://auth.example.com".to_string()),
            ..AuthConfig::default()
        };
        let v = IdentityVerifier::new(SECRET.as_bytes(), &config);

        let good = bearer(&json!({"sub": "7", "exp": NOW + 60, "iss": "https://auth.example.com"}));
        let bad = bearer(&json!({"sub": "7", "exp": NOW + 60, "iss": "https://evil.example.com"}));

        assert!(v.verify_at(Some(&good), NOW).is_ok());
        assert_eq!(v.verify_at(Some(&bad), NOW), Err(AuthError::InvalidCredential));
    }

    #[test]
    fn configured_issuer_must_be_present() {
        let config = AuthConfig {
            issuer: Some("https://auth.example.com".to_string()),
            ..AuthConfig::default()
        };
        let v = IdentityVerifier::new(SECRET.as_bytes(), &config);
        let without_iss = bearer(&json!({"sub": "7", "exp": NOW + 60}));

        assert_eq!(
            v.verify_at(Some(&without_iss), NOW),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn configured_audience_must_be_present() {
        let config = AuthConfig {
            audience: Some("files-api".to_string()),
            ..AuthConfig::default()
        };
        let v = IdentityVerifier::new(SECRET.as_bytes(), &config);
        let without_aud = bearer(&json!({"sub": "7", "exp": NOW + 60}));
        let with_aud = bearer(&json!({"sub": "7", "exp": NOW + 60, "aud": "files-api"}));

        assert_eq!(
            v.verify_at(Some(&without_aud), NOW),
            Err(AuthError::InvalidCredential)
        );
        assert!(v.verify_at(Some(&with_aud), NOW).is_ok());
    }

    #[test]
    fn numeric_sub_is_accepted() {
        let header = bearer(&json!({"sub": 99, "exp": NOW + 60}));
        let identity = verifier().verify_at(Some(&header), NOW).unwrap();
        assert_eq!(identity.subject, "99");
    }

    #[test]
    fn from_config_requires_secret() {
        let config = AuthConfig {
            jwt_secret: None,
            ..AuthConfig::default()
        };
        assert!(matches!(
            IdentityVerifier::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn gate_attaches_identity_on_success() {
        let gate = AuthGate::new(verifier());
        let route = RouteTable::standard()
            .lookup("GET", "/api/v1/files")
            .unwrap();
        let mut ctx = RequestContext::new(route);

        let far_future = u64::MAX / 2;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            bearer(&json!({"sub": "9", "exp": far_future})).parse().unwrap(),
        );

        gate.admit(&mut ctx, &headers).unwrap();
        assert_eq!(ctx.caller_id(), Ok("9"));
    }

    #[test]
    fn gate_leaves_context_bare_on_rejection() {
        let gate = AuthGate::new(verifier());
        let route = RouteTable::standard()
            .lookup("GET", "/api/v1/files")
            .unwrap();
        let mut ctx = RequestContext::new(route);

        let err = gate.admit(&mut ctx, &HeaderMap::new()).unwrap_err();
        assert_eq!(err, AuthError::MissingCredential);
        assert!(ctx.identity().is_none());
    }
}
