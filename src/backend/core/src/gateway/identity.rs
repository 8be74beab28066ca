//! Caller identity resolution.
//!
//! Authentication happens upstream. The gateway only needs the numeric user
//! id of an already-authenticated caller, taken from a request extension set
//! by an earlier layer, or from request metadata via an [`IdentityResolver`].

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tonic::codegen::http::{header::AUTHORIZATION, HeaderMap, HeaderName};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AuthzError, ErrorCode, Result};

/// An authenticated caller, as inserted into request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub user_id: u64,
}

impl CallerIdentity {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}

/// Extracts the caller from request metadata.
///
/// Absent or unusable credentials resolve to `None`; the gateway decides
/// whether that matters for the operation.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<CallerIdentity>;
}

/// Build the resolver selected by configuration.
///
/// A JWT secret wins. The raw identity header is used only when
/// `trust_identity_header` opts into it; with neither there is no resolver.
pub fn resolver_from_config(config: &GatewayConfig) -> Result<Arc<dyn IdentityResolver>> {
    match (&config.jwt_secret, config.trust_identity_header) {
        (Some(secret), _) => Ok(Arc::new(JwtResolver::hs256(secret.as_bytes()))),
        (None, true) => {
            warn!(
                header = %config.identity_header,
                "Trusting caller identity from a plain header; only safe behind an authenticating proxy"
            );
            Ok(Arc::new(TrustedHeaderResolver::new(&config.identity_header)?))
        }
        (None, false) => Err(AuthzError::new(
            ErrorCode::ConfigurationError,
            "No identity source: set gateway.jwt_secret or gateway.trust_identity_header",
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trusted header
// ─────────────────────────────────────────────────────────────────────────────

/// Reads the user id from a header set by a trusted upstream proxy.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    header: HeaderName,
}

impl TrustedHeaderResolver {
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes()).map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::ConfigurationError,
                "Invalid identity header name",
                format!("{}: {}", header, e),
            )
        })?;
        Ok(Self { header })
    }
}

impl IdentityResolver for TrustedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<CallerIdentity> {
        let raw = headers.get(&self.header)?.to_str().ok()?;
        match raw.trim().parse::<u64>() {
            Ok(id) => Some(CallerIdentity::new(id)),
            Err(_) => {
                debug!(header = %self.header, "Identity header is not a numeric user id");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JWT bearer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Validates an HS256 bearer token and reads the user id from `sub`.
pub struct JwtResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtResolver {
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl IdentityResolver for JwtResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<CallerIdentity> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?;

        let claims = match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("JWT validation failed: {}", e);
                return None;
            }
        };

        match claims.sub.parse::<u64>() {
            Ok(id) => Some(CallerIdentity::new(id)),
            Err(_) => {
                debug!(sub = %claims.sub, "JWT subject is not a numeric user id");
                None
            }
        }
    }
}
