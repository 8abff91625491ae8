//! Internal trust middleware for downstream services.
//!
//! Downstream services never see the external provider token. They
//! reconstruct the caller's [`Principal`] from gateway-attached material in
//! one of two deployment modes, chosen at router construction and never
//! mixed on a route:
//!
//! - [`TrustMode::InternalToken`] (canonical): verify the signed internal
//!   token. The secret is pre-shared; verification is local and fast.
//! - [`TrustMode::GatewayHeaders`]: trust `x-user-id`/`x-user-email`
//!   directly. Safe only behind network isolation where nothing but the
//!   gateway can reach the service. Must never be enabled on anything
//!   reachable from an untrusted network.
//!
//! Separately, `/internal/...` endpoints carry no end-user principal and
//! are gated by the shared `x-internal-api-key` instead.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::client::INTERNAL_API_KEY_HEADER;
use crate::principal::Principal;
use crate::token::TokenCodec;
use crate::{Error, Result};

/// Header carrying the signed internal token.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";
/// Plaintext user id header set by the gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Plaintext user email header set by the gateway.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// How a downstream service reconstructs the caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// Verify the signed internal token (recommended).
    InternalToken,
    /// Trust the gateway-set plaintext headers. Network isolation is the
    /// only safety argument for this mode.
    GatewayHeaders,
}

/// Trust middleware state for one downstream service.
pub struct Trust {
    mode: TrustMode,
    codec: TokenCodec,
}

impl Trust {
    /// Token-mode trust with the shared secret.
    #[must_use]
    pub fn internal_token(secret: &str) -> Self {
        Self {
            mode: TrustMode::InternalToken,
            codec: TokenCodec::new(secret),
        }
    }

    /// Header-trust mode. The codec is still constructed so a deployment
    /// can be flipped to token mode without rewiring.
    #[must_use]
    pub fn gateway_headers(secret: &str) -> Self {
        Self {
            mode: TrustMode::GatewayHeaders,
            codec: TokenCodec::new(secret),
        }
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> TrustMode {
        self.mode
    }

    /// Reconstruct the principal from the request headers.
    ///
    /// Missing and invalid credentials are distinguished in logs only; the
    /// wire response is identical for both (401, uniform message).
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        match self.mode {
            TrustMode::InternalToken => {
                let token = headers
                    .get(INTERNAL_TOKEN_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        warn!("No internal token header; request may have bypassed the gateway");
                        Error::Unauthenticated("Invalid internal token".to_string())
                    })?;
                self.codec.verify(token).map_err(|_| {
                    warn!("Internal token rejected (tampered or expired)");
                    Error::Unauthenticated("Invalid internal token".to_string())
                })
            }
            TrustMode::GatewayHeaders => {
                let user_id = headers
                    .get(USER_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty());
                let email = headers
                    .get(USER_EMAIL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty());
                match (user_id, email) {
                    (Some(user_id), Some(email)) => Ok(Principal {
                        user_id: user_id.to_string(),
                        external_id: String::new(),
                        email: email.to_string(),
                        name: None,
                    }),
                    _ => {
                        warn!("Missing user headers from gateway");
                        Err(Error::Unauthenticated(
                            "Missing user headers from gateway".to_string(),
                        ))
                    }
                }
            }
        }
    }
}

/// Axum middleware enforcing the configured trust mode.
pub async fn trust_middleware(
    State(trust): State<Arc<Trust>>,
    mut request: Request,
    next: Next,
) -> Response {
    match trust.authenticate(request.headers()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Gate for `/internal/...` endpoints: service-to-service calls with no
/// end-user principal, proven by the shared static key.
pub struct InternalGate {
    key: String,
}

impl InternalGate {
    /// Create a gate checking against `key`.
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    /// Check the API-key header. Missing → 401, mismatch → 403.
    pub fn check(&self, headers: &HeaderMap) -> Result<()> {
        let presented = headers
            .get(INTERNAL_API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                Error::Unauthenticated(
                    "Missing internal API key. Requests must come through the gateway".to_string(),
                )
            })?;
        if presented.as_bytes().ct_eq(self.key.as_bytes()).into() {
            Ok(())
        } else {
            Err(Error::Forbidden("Invalid internal API key".to_string()))
        }
    }
}

/// Axum middleware form of [`InternalGate`].
pub async fn internal_gate_middleware(
    State(gate): State<Arc<InternalGate>>,
    request: Request,
    next: Next,
) -> Response {
    match gate.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn principal() -> Principal {
        Principal {
            user_id: "usr_1".into(),
            external_id: "ext_1".into(),
            email: "a@example.com".into(),
            name: None,
        }
    }

    #[test]
    fn token_mode_accepts_a_gateway_issued_token() {
        let secret = "shared-secret";
        let trust = Trust::internal_token(secret);
        let token = TokenCodec::new(secret).issue(&principal()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        let resolved = trust.authenticate(&headers).unwrap();
        assert_eq!(resolved, principal());
    }

    #[test]
    fn token_mode_rejects_missing_and_invalid_identically() {
        let trust = Trust::internal_token("shared-secret");

        let missing = trust.authenticate(&HeaderMap::new()).unwrap_err();

        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_static("garbage"));
        let invalid = trust.authenticate(&headers).unwrap_err();

        // Same wire message for both failure kinds
        assert_eq!(missing.public_message(), invalid.public_message());
        assert_eq!(missing.status_code(), invalid.status_code());
    }

    #[test]
    fn token_mode_rejects_tokens_signed_with_another_secret() {
        let trust = Trust::internal_token("secret-a");
        let token = TokenCodec::new("secret-b").issue(&principal()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        assert!(trust.authenticate(&headers).is_err());
    }

    #[test]
    fn header_mode_builds_principal_from_headers() {
        let trust = Trust::gateway_headers("shared-secret");
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("usr_1"));
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("a@example.com"));
        let resolved = trust.authenticate(&headers).unwrap();
        assert_eq!(resolved.user_id, "usr_1");
        assert_eq!(resolved.email, "a@example.com");
    }

    #[test]
    fn header_mode_requires_both_headers() {
        let trust = Trust::gateway_headers("shared-secret");
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("usr_1"));
        assert!(trust.authenticate(&headers).is_err());
    }

    #[test]
    fn internal_gate_distinguishes_missing_from_wrong() {
        let gate = InternalGate::new("mesh-key");

        let missing = gate.check(&HeaderMap::new()).unwrap_err();
        assert_eq!(missing.status_code(), axum::http::StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_API_KEY_HEADER, HeaderValue::from_static("wrong"));
        let wrong = gate.check(&headers).unwrap_err();
        assert_eq!(wrong.status_code(), axum::http::StatusCode::FORBIDDEN);

        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_API_KEY_HEADER, HeaderValue::from_static("mesh-key"));
        assert!(gate.check(&headers).is_ok());
    }
}
