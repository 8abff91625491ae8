//! Configuration management
//!
//! Layered the way the rest of the platform expects: a YAML file merged with
//! `QUORUM_GATEWAY_`-prefixed environment variables (double underscore as the
//! section separator, e.g. `QUORUM_GATEWAY_TRUST__INTERNAL_JWT_SECRET`).
//! Optional `.env` files are loaded into the process environment first.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files loaded before the rest of the config resolves.
    /// Later files override earlier ones.
    pub env_files: Vec<String>,
    /// HTTP server settings
    pub server: ServerConfig,
    /// External identity provider settings
    pub identity: IdentityConfig,
    /// Shared secrets and internal-token settings
    pub trust: TrustSettings,
    /// Downstream service base URLs
    pub services: ServicesConfig,
    /// Circuit breaker / retry / timeout settings
    pub failsafe: FailsafeConfig,
    /// Read-through cache settings
    pub cache: CacheConfig,
    /// Realtime backplane settings
    pub realtime: RealtimeConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Allowed browser origin for CORS
    pub frontend_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            frontend_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// External identity provider (OIDC) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Expected `iss` claim
    pub issuer: String,
    /// JWKS endpoint for signature keys
    pub jwks_uri: String,
    /// Expected `aud` claim; unchecked when absent
    pub audience: Option<String>,
}

/// Shared secrets for the internal trust fabric.
///
/// Both secrets are required at startup; an empty value is a fatal
/// configuration error, not a silent default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSettings {
    /// Signing secret for internal tokens, shared by all services
    pub internal_jwt_secret: String,
    /// Static key proving gateway origin on `/internal` routes
    pub internal_api_key: String,
    /// Internal token lifetime (capped at 1 hour)
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            internal_jwt_secret: String::new(),
            internal_api_key: String::new(),
            token_ttl: Duration::from_secs(3600),
        }
    }
}

/// Downstream service base URLs, keyed by route prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// User service base URL
    pub user_url: String,
    /// Team service base URL
    pub team_url: String,
    /// Project service base URL
    pub project_url: String,
    /// Chat service base URL
    pub chat_url: String,
    /// Notification service base URL
    pub notification_url: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            user_url: "http://localhost:3001".to_string(),
            team_url: "http://localhost:3002".to_string(),
            project_url: "http://localhost:3003".to_string(),
            chat_url: "http://localhost:3004".to_string(),
            notification_url: "http://localhost:3005".to_string(),
        }
    }
}

/// A single proxy route: external prefix, downstream identity, base URL.
#[derive(Debug, Clone)]
pub struct Route {
    /// Path prefix matched against inbound requests
    pub prefix: &'static str,
    /// Stable service name, used as circuit-state key and log correlation key
    pub service: &'static str,
    /// Downstream base URL
    pub base_url: String,
}

impl ServicesConfig {
    /// The static proxy route table, in match order.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        vec![
            Route {
                prefix: "/api/users",
                service: "user-service",
                base_url: self.user_url.clone(),
            },
            Route {
                prefix: "/api/teams",
                service: "team-service",
                base_url: self.team_url.clone(),
            },
            Route {
                prefix: "/api/projects",
                service: "project-service",
                base_url: self.project_url.clone(),
            },
            Route {
                prefix: "/api/chat",
                service: "chat-service",
                base_url: self.chat_url.clone(),
            },
            Route {
                prefix: "/api/notifications",
                service: "notification-service",
                base_url: self.notification_url.clone(),
            },
        ]
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before the next probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Combined failsafe configuration for outbound calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailsafeConfig {
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings
    pub retry: RetryConfig,
    /// Hard per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Read-through cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching for GET-style mesh calls
    pub enabled: bool,
    /// TTL used when a caller does not pick one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Shared Redis cache; in-process cache when absent
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(60),
            redis_url: None,
        }
    }
}

/// Realtime backplane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Redis pub/sub URL; single-process loopback when absent
    pub redis_url: Option<String>,
    /// Pub/sub channel carrying cross-process realtime events
    pub channel: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: "quorum:realtime".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }
        figment = figment.merge(Env::prefixed("QUORUM_GATEWAY_").split("__"));

        // First pass resolves env_files, which feed the process environment
        // before the final extraction.
        let prelim: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        if prelim.env_files.is_empty() {
            return Ok(prelim);
        }
        prelim.load_env_files();

        figment
            .merge(Env::prefixed("QUORUM_GATEWAY_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configured `.env` files into the process environment.
    fn load_env_files(&self) {
        for path in &self.env_files {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::debug!(path = %path, "Loaded environment file"),
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping environment file"),
            }
        }
    }

    /// Reject configurations that would silently weaken the trust fabric.
    ///
    /// The process must exit non-zero when a required secret is absent; the
    /// binary maps this error to its exit code.
    pub fn validate(&self) -> Result<()> {
        if self.trust.internal_jwt_secret.is_empty() {
            return Err(Error::Config(
                "trust.internal_jwt_secret is required (QUORUM_GATEWAY_TRUST__INTERNAL_JWT_SECRET)"
                    .to_string(),
            ));
        }
        if self.trust.internal_api_key.is_empty() {
            return Err(Error::Config(
                "trust.internal_api_key is required (QUORUM_GATEWAY_TRUST__INTERNAL_API_KEY)"
                    .to_string(),
            ));
        }
        if self.identity.issuer.is_empty() || self.identity.jwks_uri.is_empty() {
            return Err(Error::Config(
                "identity.issuer and identity.jwks_uri are required".to_string(),
            ));
        }
        if self.trust.token_ttl > Duration::from_secs(3600) {
            return Err(Error::Config(
                "trust.token_ttl must not exceed 1h".to_string(),
            ));
        }
        Ok(())
    }
}
