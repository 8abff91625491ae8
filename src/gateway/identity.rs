//! External identity-provider token verification.
//!
//! The gateway is the only component that ever sees the provider token.
//! Verification flow:
//!
//! 1. Decode the JWT header (no verification) to extract `kid`.
//! 2. Fetch the provider's JWKS (cached for 1 hour; refreshed once on an
//!    unknown `kid`).
//! 3. Verify the signature and standard claims (`exp`, `iss`, `aud`).
//! 4. Return the [`ExternalIdentity`] carried by the claims.
//!
//! The trait seam exists so tests (and alternative providers) can stand in
//! for the JWKS round trip.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::principal::ExternalIdentity;
use crate::{Error, Result};

/// Verifies external identity-provider tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify `token` and extract the identity it asserts.
    ///
    /// Any failure (malformed, bad signature, expired, wrong issuer)
    /// yields [`Error::Unauthenticated`] with the uniform wire message;
    /// the specific cause is logged, not returned.
    async fn verify(&self, token: &str) -> Result<ExternalIdentity>;
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// OIDC verifier backed by the provider's JWKS endpoint.
pub struct OidcVerifier {
    config: IdentityConfig,
    http: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
    jwks_ttl: Duration,
}

impl OidcVerifier {
    /// Create a verifier for the configured provider.
    #[must_use]
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            jwks: RwLock::new(None),
            jwks_ttl: Duration::from_secs(3600),
        }
    }

    async fn jwks(&self, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.jwks.read().as_ref() {
                if cached.fetched_at.elapsed() < self.jwks_ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri = %self.config.jwks_uri, "Fetching JWKS");
        let keys: JwkSet = self
            .http
            .get(&self.config.jwks_uri)
            .send()
            .await?
            .json()
            .await?;
        *self.jwks.write() = Some(CachedJwks {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.config.issuer]);
        match &self.config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait]
impl IdentityProvider for OidcVerifier {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity> {
        let invalid = || Error::Unauthenticated("Invalid token".to_string());

        let header = decode_header(token).map_err(|e| {
            warn!(error = %e, "Provider token header undecodable");
            invalid()
        })?;
        let kid = header.kid.ok_or_else(|| {
            warn!("Provider token missing kid");
            invalid()
        })?;

        // Unknown kid triggers exactly one refresh; a second miss means the
        // key genuinely does not exist.
        let mut jwks = self.jwks(false).await?;
        if jwks.find(&kid).is_none() {
            jwks = self.jwks(true).await?;
        }
        let jwk = jwks.find(&kid).ok_or_else(|| {
            warn!(kid, "Provider signing key not in JWKS");
            invalid()
        })?;

        let key = DecodingKey::from_jwk(jwk).map_err(|e| {
            warn!(error = %e, "JWKS key unusable");
            invalid()
        })?;

        let data = decode::<ProviderClaims>(token, &key, &self.validation()).map_err(|e| {
            warn!(error = %e, "Provider token verification failed");
            invalid()
        })?;

        Ok(ExternalIdentity {
            subject: data.claims.sub,
            email: data.claims.email,
            name: data.claims.name,
        })
    }
}
