//! Read-through cache backends for mesh calls.
//!
//! Cache keys are always chosen by the caller, never derived from URLs,
//! so callers control invalidation granularity. A cache backend failure is
//! logged and treated as a miss; it must never block or fail the live call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Cache backend abstraction.
///
/// All operations are best-effort: implementations swallow backend errors
/// (logging them) rather than surfacing them to callers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a cached value, `None` on miss, expiry, or backend failure.
    async fn get(&self, key: &str) -> Option<Value>;
    /// Store a value under `key` for `ttl`. A zero TTL stores nothing.
    async fn set(&self, key: &str, value: &Value, ttl: Duration);
    /// Drop a key (explicit invalidation).
    async fn delete(&self, key: &str);
}

struct CachedEntry {
    value: Value,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// In-process TTL cache.
///
/// The default backend: per-process, no cross-service coherence. Fine for
/// the gateway's user lookups where staleness is bounded by the TTL.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache hits served so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses (absent or expired) so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        // Expired entries are dropped on access rather than swept.
        self.entries.remove_if(key, |_, e| e.is_expired());
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value: value.clone(),
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Redis-backed cache shared across processes.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("Invalid Redis URL: {e}")))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Internal(format!("Redis connection failed: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // Treated as a miss; the live call proceeds.
                warn!(key, error = %e, "Cache get failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let mut conn = self.conn.clone();
        let raw = value.to_string();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, raw, ttl.as_secs())
            .await
        {
            warn!(key, error = %e, "Cache set failed");
        } else {
            debug!(key, ttl_s = ttl.as_secs(), "Cached response");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }
}
