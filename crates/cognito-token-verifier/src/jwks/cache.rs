//! Per-verifier key set cache
//!
//! Entries are fresh for the configured TTL and then evicted, so the next
//! lookup refetches. Concurrent misses for the same URL share one in-flight
//! fetch (`moka`'s `try_get_with` coalesces initializers); failures are
//! handed to every waiter and are not cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use tracing::{debug, warn};

use super::{FetchError, KeySet, KeySetSource};
use crate::resolver::{self, ResolveError, ResolvedKey};

/// Upper bound on distinct key set URLs held per cache
const MAX_CACHED_URLS: u64 = 16;

/// A fetched key set with its converted keys and retrieval time
///
/// Every record is converted once, when the set is fetched. A record that
/// fails conversion only reports its error when its `kid` is resolved.
#[derive(Debug)]
pub struct CachedKeySet {
    key_set: KeySet,
    keys: HashMap<String, Result<ResolvedKey, ResolveError>>,
    fetched_at: Instant,
}

impl CachedKeySet {
    /// Convert every record of `key_set`
    pub fn new(key_set: KeySet) -> Self {
        let keys = key_set
            .iter()
            .map(|record| (record.key_id().to_string(), resolver::convert(record)))
            .collect();
        Self {
            key_set,
            keys,
            fetched_at: Instant::now(),
        }
    }

    /// The cached key set
    pub fn key_set(&self) -> &KeySet {
        &self.key_set
    }

    /// Whether the set has a record for `key_id`
    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// The converted key for `key_id`
    ///
    /// # Errors
    ///
    /// - [`ResolveError::UnknownKeyId`] if no record matches exactly
    /// - [`ResolveError::KeyConversion`] if the record could not be converted
    pub fn resolve(&self, key_id: &str) -> Result<&ResolvedKey, ResolveError> {
        match self.keys.get(key_id) {
            Some(Ok(key)) => Ok(key),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ResolveError::UnknownKeyId(key_id.to_string())),
        }
    }

    /// Time since the set was fetched
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// TTL cache of key sets in front of a [`KeySetSource`]
#[derive(Clone)]
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    entries: Cache<String, Arc<CachedKeySet>>,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("source", &self.source)
            .field("cached_urls", &self.entries.entry_count())
            .field("cache_ttl", &self.cache_ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl KeySetCache {
    /// Create a cache over `source`
    ///
    /// * `cache_ttl` - how long a fetched set stays fresh
    /// * `min_refresh_interval` - minimum age before [`refresh`](Self::refresh)
    ///   may replace a set
    pub fn new(
        source: Arc<dyn KeySetSource>,
        cache_ttl: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_CACHED_URLS)
            .time_to_live(cache_ttl)
            .build();

        Self {
            source,
            entries,
            cache_ttl,
            min_refresh_interval,
        }
    }

    /// Return the fresh set for `url`, fetching it if absent or stale
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the (possibly shared) fetch.
    pub async fn get(&self, url: &str) -> Result<Arc<CachedKeySet>, FetchError> {
        if let Some(cached) = self.entries.get(url).await {
            debug!(jwks_uri = %url, age_ms = cached.age().as_millis(), "Using cached JWKS");
            return Ok(cached);
        }

        let source = Arc::clone(&self.source);
        let owned_url = url.to_string();
        self.entries
            .try_get_with(url.to_string(), async move {
                let key_set = source.fetch(&owned_url).await?;
                Ok::<_, FetchError>(Arc::new(CachedKeySet::new(key_set)))
            })
            .await
            .map_err(|shared: Arc<FetchError>| (*shared).clone())
    }

    /// Replace `seen` with a newly fetched set, e.g. after an unknown `kid`
    ///
    /// Returns `Ok(None)` without fetching when `seen` is younger than the
    /// minimum refresh interval. If another caller already replaced `seen`,
    /// the newer entry is returned instead of fetching again.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the refetch.
    pub async fn refresh(
        &self,
        url: &str,
        seen: &Arc<CachedKeySet>,
    ) -> Result<Option<Arc<CachedKeySet>>, FetchError> {
        let age = seen.age();
        if age < self.min_refresh_interval {
            debug!(
                jwks_uri = %url,
                age_ms = age.as_millis(),
                "JWKS refresh rate limited, keeping cached set"
            );
            return Ok(None);
        }

        match self.entries.get(url).await {
            Some(current) if !Arc::ptr_eq(&current, seen) => return Ok(Some(current)),
            Some(_) => self.entries.invalidate(url).await,
            None => {}
        }

        warn!(jwks_uri = %url, "Refreshing JWKS");
        self.get(url).await.map(Some)
    }

    /// Drop every cached set
    pub fn clear(&self) {
        self.entries.invalidate_all();
        debug!("JWKS cache cleared");
    }

    /// Whether a fresh entry exists for `url`
    pub async fn is_cached(&self, url: &str) -> bool {
        self.entries.get(url).await.is_some()
    }

    /// Configured freshness window
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl KeySetSource for CountingSource {
        async fn fetch(&self, _url: &str) -> Result<KeySet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(FetchError::Status(503));
            }
            let body = json!({"keys": [
                {"kty": "RSA", "kid": "k1", "use": "sig", "n": MODULUS, "e": "AQAB"},
                {"kty": "RSA", "kid": "broken", "e": "AQAB"}
            ]});
            KeySet::from_json(body.to_string().as_bytes())
        }
    }

    // 512-bit modulus; size is irrelevant for conversion
    const MODULUS: &str = "pTOwEcQG--ceJKW7doIEowZqL5nVdbsBgpyk_swYudVAh1ggDfCtFpj7qsi_FSTLIF52-IdbZR8wsNB6mSkQpQ";

    const URL: &str = "https://cognito-idp.us-east-1.amazonaws.com/pool/.well-known/jwks.json";

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(
            source.clone(),
            Duration::from_secs(600),
            Duration::from_secs(5),
        );

        let lookups = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(URL).await })
        });
        for handle in lookups.collect::<Vec<_>>() {
            let entry = handle.await.unwrap().unwrap();
            assert!(entry.key_set().get("k1").is_some());
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_cached(URL).await);
    }

    #[tokio::test]
    async fn test_failures_are_shared_but_not_cached() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = KeySetCache::new(
            source.clone(),
            Duration::from_secs(600),
            Duration::from_secs(5),
        );

        let (a, b) = tokio::join!(cache.get(URL), cache.get(URL));
        assert_eq!(a.unwrap_err(), FetchError::Status(503));
        assert_eq!(b.unwrap_err(), FetchError::Status(503));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert!(!cache.is_cached(URL).await);
        let _ = cache.get(URL).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_entries_are_refetched() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(
            source.clone(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        cache.get(URL).await.unwrap();
        cache.get(URL).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.get(URL).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_is_rate_limited() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(
            source.clone(),
            Duration::from_secs(600),
            Duration::from_secs(5),
        );

        let seen = cache.get(URL).await.unwrap();
        assert!(cache.refresh(URL, &seen).await.unwrap().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_old_entry_once() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(source.clone(), Duration::from_secs(600), Duration::ZERO);

        let seen = cache.get(URL).await.unwrap();
        let fresh = cache.refresh(URL, &seen).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&seen, &fresh));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // A second caller holding the old entry picks up the replacement
        let again = cache.refresh(URL, &seen).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&fresh, &again));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(source, Duration::from_secs(600), Duration::from_secs(5));
        cache.get(URL).await.unwrap();
        cache.clear();
        assert!(!cache.is_cached(URL).await);
    }

    #[tokio::test]
    async fn test_keys_are_converted_once_per_fetch() {
        let source = Arc::new(CountingSource::default());
        let cache = KeySetCache::new(source, Duration::from_secs(600), Duration::from_secs(5));

        let first = cache.get(URL).await.unwrap();
        let second = cache.get(URL).await.unwrap();
        let a = first.resolve("k1").unwrap();
        let b = second.resolve("k1").unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.key_id(), "k1");

        // Conversion failures stay scoped to their own kid
        assert!(matches!(
            first.resolve("broken"),
            Err(ResolveError::KeyConversion(_))
        ));
        assert!(first.contains("broken"));
        assert_eq!(
            first.resolve("K1").unwrap_err(),
            ResolveError::UnknownKeyId("K1".to_string())
        );
    }
}
