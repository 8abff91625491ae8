//! Resilient service-to-service HTTP client.
//!
//! Every outbound call to a peer service goes through a per-service
//! [`Failsafe`] (circuit breaker + retry + timeout) keyed by the service's
//! stable name. GET-style calls may opt into read-through caching with an
//! explicit caller-chosen key.

mod apis;
mod effects;

pub use apis::MeshApi;
pub use effects::SideEffects;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::cache::CacheStore;
use crate::config::{CacheConfig, FailsafeConfig};
use crate::failsafe::Failsafe;
use crate::{Error, Result};

/// Header proving gateway/service origin on internal endpoints.
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// HTTP client for the service mesh.
pub struct ServiceClient {
    http: reqwest::Client,
    failsafes: DashMap<String, Failsafe>,
    failsafe_config: FailsafeConfig,
    cache: Arc<dyn CacheStore>,
    cache_enabled: bool,
    internal_api_key: String,
}

impl ServiceClient {
    /// Create a client with the given failsafe/cache settings.
    #[must_use]
    pub fn new(
        failsafe_config: FailsafeConfig,
        cache_config: &CacheConfig,
        cache: Arc<dyn CacheStore>,
        internal_api_key: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            failsafes: DashMap::new(),
            failsafe_config,
            cache,
            cache_enabled: cache_config.enabled,
            internal_api_key,
        }
    }

    /// The failsafe guarding `service`, created on first use.
    ///
    /// Service names must be stable strings; they key circuit state and
    /// appear in logs.
    pub fn failsafe(&self, service: &str) -> Failsafe {
        self.failsafes
            .entry(service.to_string())
            .or_insert_with(|| Failsafe::new(service, &self.failsafe_config))
            .clone()
    }

    /// The underlying HTTP client, for callers that relay raw responses.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// GET with read-through caching.
    ///
    /// On a cache hit the network is never touched. A miss (or a cache
    /// backend failure, which is logged inside the store) falls through to
    /// the failsafe-wrapped live call; the result is cached on success.
    pub async fn get_cached(
        &self,
        service: &str,
        url: &str,
        cache_key: &str,
        ttl: Duration,
    ) -> Result<Value> {
        if self.cache_enabled {
            if let Some(value) = self.cache.get(cache_key).await {
                debug!(service, cache_key, "Served from cache");
                return Ok(value);
            }
        }
        let value = self.request(service, Method::GET, url, None).await?;
        if self.cache_enabled {
            self.cache.set(cache_key, &value, ttl).await;
        }
        Ok(value)
    }

    /// Plain GET without caching.
    pub async fn get(&self, service: &str, url: &str) -> Result<Value> {
        self.request(service, Method::GET, url, None).await
    }

    /// POST a JSON body.
    pub async fn post(&self, service: &str, url: &str, body: &Value) -> Result<Value> {
        self.request(service, Method::POST, url, Some(body.clone()))
            .await
    }

    /// Drop a cache key. Callers own invalidation granularity.
    pub async fn invalidate(&self, cache_key: &str) {
        self.cache.delete(cache_key).await;
    }

    async fn request(
        &self,
        service: &str,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let failsafe = self.failsafe(service);
        let http = self.http.clone();
        let api_key = self.internal_api_key.clone();
        let url = url.to_string();
        let service_name = service.to_string();

        failsafe
            .call(&format!("{method} {url}"), move || {
                let http = http.clone();
                let api_key = api_key.clone();
                let url = url.clone();
                let method = method.clone();
                let body = body.clone();
                let service_name = service_name.clone();
                async move {
                    let mut req = http
                        .request(method, &url)
                        .header(INTERNAL_API_KEY_HEADER, &api_key);
                    if let Some(body) = &body {
                        req = req.json(body);
                    }
                    let response = req.send().await?;
                    let status = response.status();
                    if status.is_success() {
                        Ok(response.json::<Value>().await?)
                    } else {
                        Err(status_to_error(status, &service_name))
                    }
                }
            })
            .await
    }
}

/// Map a downstream HTTP status onto the crate error taxonomy.
fn status_to_error(status: reqwest::StatusCode, service: &str) -> Error {
    match status.as_u16() {
        400 => Error::Validation(format!("{service} rejected the request")),
        401 => Error::Unauthenticated(format!("{service} rejected the credential")),
        403 => Error::Forbidden(format!("{service} denied access")),
        404 => Error::NotFound(format!("Resource not found at {service}")),
        409 => Error::Conflict(format!("{service} reported a conflict")),
        _ => Error::UpstreamUnavailable(format!("{service} returned {status}")),
    }
}

/// Pull the `data` field out of a `{success, data}` envelope, or return the
/// body unchanged when a service responds bare.
#[must_use]
pub fn unwrap_envelope(mut body: Value) -> Value {
    match body.get_mut("data") {
        Some(data) => data.take(),
        None => body,
    }
}
