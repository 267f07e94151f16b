//! TTL-bound cache of the provider's signing keys.
//!
//! Lookups take a read lock on the current [`SigningKeySet`]. Refreshes are
//! single-flighted through an async gate; the fetch itself runs with no map
//! lock held and the new set is swapped in under a short write lock. Tasks
//! that queued on the gate behind a fetch share its outcome, success or
//! failure, instead of fetching again.
//! An expired set is never served, even when the refresh that should replace
//! it fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AuthError;
use crate::jwks::KeySource;
use crate::key_material::{PublicKey, reconstruct};

pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Unknown-kid refetches against a still-fresh set are throttled to this interval.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCacheConfig {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub min_refresh_interval: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_KEY_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

/// Immutable snapshot of one successful fetch.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<PublicKey>>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl SigningKeySet {
    pub fn get(&self, kid: &str) -> Option<Arc<PublicKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Point-in-time view of the cache for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCacheSnapshot {
    pub kids: Vec<String>,
    pub fetched_at: Option<Instant>,
    pub expires_at: Option<Instant>,
    pub fetch_count: u64,
}

pub struct SigningKeyCache {
    source: Arc<dyn KeySource>,
    config: KeyCacheConfig,
    current: RwLock<Option<Arc<SigningKeySet>>>,
    refresh_gate: Mutex<()>,
    /// Bumped after every fetch attempt, successful or not; lets waiters on
    /// the gate notice that someone else already tried.
    attempts: AtomicU64,
    /// Error of the latest attempt; `None` after a success.
    last_failure: StdMutex<Option<AuthError>>,
    fetch_count: AtomicU64,
}

impl SigningKeyCache {
    pub fn new(source: Arc<dyn KeySource>, config: KeyCacheConfig) -> Self {
        Self {
            source,
            config,
            current: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_failure: StdMutex::new(None),
            fetch_count: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &KeyCacheConfig {
        &self.config
    }

    /// Resolve a key by `kid`, refreshing the set when it is missing or stale.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<PublicKey>, AuthError> {
        let observed = self.attempts.load(Ordering::Acquire);

        if let Some(set) = self.fresh_set()? {
            if let Some(key) = set.get(kid) {
                return Ok(key);
            }
        }

        let _gate = self.refresh_gate.lock().await;

        let fresh = self.fresh_set()?;
        if let Some(key) = fresh.as_ref().and_then(|set| set.get(kid)) {
            return Ok(key);
        }
        if self.attempts.load(Ordering::Acquire) != observed {
            // Another task fetched while we waited; its outcome is ours.
            return match self.last_failure()? {
                Some(err) => Err(err),
                None => Err(key_not_found(kid)),
            };
        }
        if let Some(set) = fresh {
            if set.fetched_at.elapsed() < self.config.min_refresh_interval {
                tracing::debug!(kid, "unknown kid against a recently fetched key set");
                return Err(key_not_found(kid));
            }
        }

        let set = self.refresh_locked().await?;
        set.get(kid).ok_or_else(|| key_not_found(kid))
    }

    /// Fetch now, regardless of freshness. Waits for any in-flight refresh.
    pub async fn force_refresh(&self) -> Result<usize, AuthError> {
        let _gate = self.refresh_gate.lock().await;
        Ok(self.refresh_locked().await?.len())
    }

    /// Startup prefetch. Failure is logged, not fatal: requests retry lazily.
    pub async fn warm(&self) -> bool {
        match self.force_refresh().await {
            Ok(count) => {
                tracing::info!(key_count = count, "signing key cache warmed");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, source = %self.source.describe(), "signing key prefetch failed");
                false
            }
        }
    }

    pub fn snapshot(&self) -> KeyCacheSnapshot {
        let current = self.current.read().ok().and_then(|guard| guard.clone());
        let fetch_count = self.fetch_count.load(Ordering::Relaxed);
        match current {
            Some(set) => {
                let mut kids: Vec<String> = set.keys.keys().cloned().collect();
                kids.sort();
                KeyCacheSnapshot {
                    kids,
                    fetched_at: Some(set.fetched_at),
                    expires_at: Some(set.expires_at),
                    fetch_count,
                }
            }
            None => KeyCacheSnapshot {
                kids: Vec::new(),
                fetched_at: None,
                expires_at: None,
                fetch_count,
            },
        }
    }

    fn fresh_set(&self) -> Result<Option<Arc<SigningKeySet>>, AuthError> {
        let guard = self
            .current
            .read()
            .map_err(|_| AuthError::KeyUnavailable("key cache lock poisoned".to_string()))?;
        Ok(guard.as_ref().filter(|set| set.is_fresh(Instant::now())).cloned())
    }

    fn last_failure(&self) -> Result<Option<AuthError>, AuthError> {
        self.last_failure
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| AuthError::KeyUnavailable("key cache lock poisoned".to_string()))
    }

    /// Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<Arc<SigningKeySet>, AuthError> {
        let outcome = self.fetch_and_swap().await;
        if let Ok(mut last) = self.last_failure.lock() {
            *last = outcome.as_ref().err().cloned();
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn fetch_and_swap(&self) -> Result<Arc<SigningKeySet>, AuthError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let fetched = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch()).await;
        let jwks = match fetched {
            Ok(Ok(jwks)) => jwks,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, source = %self.source.describe(), "signing key fetch failed");
                return Err(AuthError::KeyUnavailable(err.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                    source = %self.source.describe(),
                    "signing key fetch timed out"
                );
                return Err(AuthError::KeyUnavailable(format!(
                    "fetch timed out after {:?}",
                    self.config.fetch_timeout
                )));
            }
        };

        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for descriptor in &jwks.keys {
            match reconstruct(descriptor) {
                Ok(key) => {
                    keys.insert(key.kid().to_string(), Arc::new(key));
                }
                Err(err) => tracing::warn!(
                    kid = descriptor.kid.as_deref().unwrap_or("<none>"),
                    kty = %descriptor.kty,
                    error = %err,
                    "skipping unusable signing key"
                ),
            }
        }

        let now = Instant::now();
        let set = Arc::new(SigningKeySet {
            keys,
            fetched_at: now,
            expires_at: now + self.config.ttl,
        });

        {
            let mut guard = self
                .current
                .write()
                .map_err(|_| AuthError::KeyUnavailable("key cache lock poisoned".to_string()))?;
            *guard = Some(Arc::clone(&set));
        }

        tracing::info!(
            key_count = set.len(),
            offered = jwks.keys.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "signing keys refreshed"
        );
        Ok(set)
    }
}

fn key_not_found(kid: &str) -> AuthError {
    AuthError::KeyNotFound {
        kid: kid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeKeySource, TestSigner};

    fn cache_with(source: Arc<FakeKeySource>, config: KeyCacheConfig) -> SigningKeyCache {
        SigningKeyCache::new(source, config)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_from_cache_until_ttl_then_refetches() {
        let signer = TestSigner::generate("k1");
        let source = Arc::new(FakeKeySource::serving(vec![signer.jwk()]));
        let cache = cache_with(
            source.clone(),
            KeyCacheConfig {
                ttl: Duration::from_secs(60),
                ..Default::default()
            },
        );

        cache.get_key("k1").await.unwrap();
        cache.get_key("k1").await.unwrap();
        assert_eq!(source.fetches(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_key("k1").await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_set_is_not_served_when_refresh_fails() {
        let signer = TestSigner::generate("k1");
        let source = Arc::new(FakeKeySource::serving(vec![signer.jwk()]));
        let cache = cache_with(
            source.clone(),
            KeyCacheConfig {
                ttl: Duration::from_secs(60),
                ..Default::default()
            },
        );
        cache.get_key("k1").await.unwrap();

        source.fail_with(crate::jwks::KeySourceError::Status(500));
        tokio::time::advance(Duration::from_secs(61)).await;

        let err = cache.get_key("k1").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_surfaces_as_unavailable() {
        let source = Arc::new(FakeKeySource::serving(Vec::new()).with_delay(Duration::from_secs(30)));
        let cache = cache_with(source.clone(), KeyCacheConfig::default());

        let err = cache.get_key("k1").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_kid_refetch_is_throttled() {
        let signer = TestSigner::generate("k1");
        let source = Arc::new(FakeKeySource::serving(vec![signer.jwk()]));
        let cache = cache_with(source.clone(), KeyCacheConfig::default());

        cache.get_key("k1").await.unwrap();
        assert!(matches!(
            cache.get_key("rotated").await,
            Err(AuthError::KeyNotFound { .. })
        ));
        assert_eq!(source.fetches(), 1);

        tokio::time::advance(DEFAULT_MIN_REFRESH_INTERVAL).await;
        let rotated = TestSigner::generate("rotated");
        source.serve(vec![signer.jwk(), rotated.jwk()]);
        cache.get_key("rotated").await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let signer = TestSigner::generate("k1");
        let source = Arc::new(
            FakeKeySource::serving(vec![signer.jwk()]).with_delay(Duration::from_millis(50)),
        );
        let cache = Arc::new(cache_with(source.clone(), KeyCacheConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_key("k1").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.fetches(), 1);
        assert_eq!(cache.snapshot().fetch_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_failed_fetch() {
        let source = Arc::new(FakeKeySource::serving(Vec::new()).with_delay(Duration::from_secs(30)));
        let cache = Arc::new(cache_with(source.clone(), KeyCacheConfig::default()));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_key("k1").await }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, AuthError::KeyUnavailable(_)), "{err:?}");
        }

        assert_eq!(source.fetches(), 1);
        assert!(started.elapsed() <= DEFAULT_FETCH_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_a_failed_fetch_tries_again() {
        let signer = TestSigner::generate("k1");
        let source = Arc::new(FakeKeySource::serving(vec![signer.jwk()]));
        source.fail_with(crate::jwks::KeySourceError::Status(502));
        let cache = cache_with(source.clone(), KeyCacheConfig::default());

        assert!(matches!(cache.get_key("k1").await, Err(AuthError::KeyUnavailable(_))));

        source.serve(vec![signer.jwk()]);
        cache.get_key("k1").await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_entries_are_skipped_not_fatal() {
        let good = TestSigner::generate("good");
        let mut weak = good.jwk();
        weak.kid = Some("weak".into());
        weak.n = Some("AQAB".into());
        let source = Arc::new(FakeKeySource::serving(vec![weak, good.jwk()]));
        let cache = cache_with(source, KeyCacheConfig::default());

        cache.get_key("good").await.unwrap();
        assert!(matches!(
            cache.get_key("weak").await,
            Err(AuthError::KeyNotFound { .. })
        ));
        assert_eq!(cache.snapshot().kids, vec!["good".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_reports_failure_without_erroring() {
        let source = Arc::new(FakeKeySource::serving(Vec::new()));
        source.fail_with(crate::jwks::KeySourceError::Transport("refused".into()));
        let cache = cache_with(source.clone(), KeyCacheConfig::default());

        assert!(!cache.warm().await);
        assert!(cache.snapshot().fetched_at.is_none());
    }
}
