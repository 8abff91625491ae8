//! Internal token codec: the service-to-service credential.
//!
//! The gateway mints one of these per authenticated request; downstream
//! services verify it with the same pre-shared secret and reconstruct the
//! caller's [`Principal`] without re-verifying the external provider token.
//!
//! Verification failures are opaque: malformed, tampered, and expired
//! tokens all surface as [`InvalidToken`]. The distinction belongs in
//! logs, never on the wire.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::principal::Principal;
use crate::{Error, Result};

/// Hard ceiling on internal token lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Opaque verification failure. Carries no detail about the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid internal token")]
pub struct InvalidToken;

#[derive(Debug, Serialize, Deserialize)]
struct InternalClaims {
    #[serde(flatten)]
    principal: Principal,
    iat: i64,
    exp: i64,
}

/// Signs and verifies internal tokens with the shared secret.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec with the default 1-hour token lifetime.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: all services share one clock domain, so no skew
        // window is granted past the expiry second.
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: MAX_TOKEN_TTL,
            validation,
        }
    }

    /// Create a codec with a custom lifetime (capped at one hour).
    pub fn with_ttl(secret: &str, ttl: Duration) -> Result<Self> {
        if ttl > MAX_TOKEN_TTL {
            return Err(Error::Config(format!(
                "Internal token TTL {}s exceeds the 1h maximum",
                ttl.as_secs()
            )));
        }
        let mut codec = Self::new(secret);
        codec.ttl = ttl;
        Ok(codec)
    }

    /// Serialize and sign a principal into a short-lived token.
    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let claims = InternalClaims {
            principal: principal.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Failed to sign internal token: {e}")))
    }

    /// Verify signature and expiry, returning the embedded principal.
    pub fn verify(&self, token: &str) -> std::result::Result<Principal, InvalidToken> {
        decode::<InternalClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.principal)
            .map_err(|_| InvalidToken)
    }
}
