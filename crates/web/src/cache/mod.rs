mod shared;

pub use shared::{PgCacheStore, run_invalidation_listener};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use storage::error::Result as StorageResult;
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub fresh_ttl: Duration,
    /// Stale window as a multiple of the fresh TTL; 2x leaves revalidation
    /// headroom before the entry is evicted outright.
    pub stale_multiplier: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: Duration::from_millis(1000),
            stale_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub payload: Value,
    pub fresh_until: DateTime<Utc>,
    pub stale_until: DateTime<Utc>,
}

/// Cumulative counters since process start.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub backend_available: bool,
}

struct CacheInner {
    shared: Option<PgCacheStore>,
    local: Mutex<HashMap<String, StoredEntry>>,
    in_flight: Mutex<HashSet<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    shared_available: AtomicBool,
    config: CacheConfig,
}

/// Stale-while-revalidate cache. A fresh entry is served without computing;
/// a stale entry is served immediately while one detached task refreshes it;
/// an expired or absent entry blocks the caller on the compute. The shared
/// Postgres backend is consulted first when configured and healthy, with the
/// process-local map as fallback. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SwrCache {
    inner: Arc<CacheInner>,
}

impl SwrCache {
    pub fn new(config: CacheConfig, shared: Option<PgCacheStore>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                shared,
                local: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                revalidations: AtomicU64::new(0),
                shared_available: AtomicBool::new(true),
                config,
            }),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            revalidations: self.inner.revalidations.load(Ordering::Relaxed),
            backend_available: self.inner.shared.is_some()
                && self.inner.shared_available.load(Ordering::Relaxed),
        }
    }

    /// Drop the process-local copy of `key`. Called by the invalidation
    /// listener when a peer process rewrites the shared entry.
    pub fn drop_local(&self, key: &str) {
        self.inner.local.lock().unwrap().remove(key);
    }

    pub async fn get_or_set<T, F, Fut>(&self, key: &str, compute: F) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        if let Some(entry) = self.lookup(key).await {
            match serde_json::from_value::<T>(entry.payload.clone()) {
                Ok(value) => {
                    let now = Utc::now();
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);

                    if now < entry.fresh_until {
                        return Ok(value);
                    }

                    // Stale but not expired: serve the old value and refresh
                    // in the background. The caller never waits and never
                    // sees a revalidation error.
                    self.spawn_revalidation(key, compute);
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(%key, error = %err, "discarding undecodable cache payload");
                }
            }
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);

        let value = compute().await?;
        self.store_value(key, &value).await;

        Ok(value)
    }

    fn spawn_revalidation<T, F, Fut>(&self, key: &str, compute: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // At most one outstanding revalidation per key in this process.
        if !self.inner.in_flight.lock().unwrap().insert(key.to_string()) {
            return;
        }
        self.inner.revalidations.fetch_add(1, Ordering::Relaxed);

        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match compute().await {
                Ok(value) => cache.store_value(&key, &value).await,
                Err(err) => {
                    // Keep serving the stale entry.
                    tracing::warn!(%key, error = %err, "cache revalidation failed; retaining stale entry");
                }
            }
            cache.inner.in_flight.lock().unwrap().remove(&key);
        });
    }

    async fn lookup(&self, key: &str) -> Option<StoredEntry> {
        if let Some(shared) = &self.inner.shared {
            match shared.get(key).await {
                Ok(found) => {
                    self.inner.shared_available.store(true, Ordering::Relaxed);
                    return found;
                }
                Err(err) => {
                    self.inner.shared_available.store(false, Ordering::Relaxed);
                    tracing::warn!(%key, error = %err, "shared cache unavailable; using local backend");
                }
            }
        }

        let mut local = self.inner.local.lock().unwrap();
        match local.get(key) {
            // Never serve past stale_until: evict instead.
            Some(entry) if Utc::now() < entry.stale_until => Some(entry.clone()),
            Some(_) => {
                local.remove(key);
                None
            }
            None => None,
        }
    }

    async fn store_value<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%key, error = %err, "failed to serialize cache payload");
                return;
            }
        };

        let now = Utc::now();
        let fresh = chrono::Duration::from_std(self.inner.config.fresh_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let entry = StoredEntry {
            payload,
            fresh_until: now + fresh,
            stale_until: now + fresh * self.inner.config.stale_multiplier.max(1) as i32,
        };

        if let Some(shared) = &self.inner.shared {
            match shared.put(key, &entry).await {
                Ok(()) => {
                    self.inner.shared_available.store(true, Ordering::Relaxed);
                    // Peers drop their local copies rather than serve what
                    // this write just replaced.
                    let shared = shared.clone();
                    let key = key.to_string();
                    tokio::spawn(async move {
                        if let Err(err) = shared.notify_invalidation(&key).await {
                            tracing::warn!(%key, error = %err, "cache invalidation broadcast failed");
                        }
                    });
                    return;
                }
                Err(err) => {
                    self.inner.shared_available.store(false, Ordering::Relaxed);
                    tracing::warn!(%key, error = %err, "shared cache write failed; caching locally");
                }
            }
        }

        self.inner.local.lock().unwrap().insert(key.to_string(), entry);
    }
}
