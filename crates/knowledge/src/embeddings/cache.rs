//! Content-addressed embedding cache with single-flight misses.
//!
//! Completed vectors live in a bounded LRU. Computations in progress live
//! in a separate in-flight registry keyed the same way, so a vector that a
//! caller is waiting on can never be evicted: it is not in the LRU until
//! it is finished, and finished vectors are handed out as shared `Arc`s.
//!
//! Lock order is always `in_flight` before `entries`.

use crate::chunker::normalize_text;
use crate::embeddings::provider::EmbeddingProvider;
use crate::retry::{retry_with_timeout, RetryPolicy};
use lru::LruCache;
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Immutable, shared embedding vector.
pub type Vector = Arc<[f32]>;

type Flight = Arc<OnceCell<Vector>>;

/// Counters exposed through engine stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined a computation already in flight
    pub coalesced: u64,
    /// Calls made to the embedding service
    pub computations: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

/// Memoizes embeddings by hash of (model, normalized text).
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    entries: Mutex<LruCache<String, Vector>>,
    in_flight: Mutex<HashMap<String, Flight>>,
    policy: RetryPolicy,
    timeout: Duration,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded maps stay consistent even if a holder panicked.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EmbeddingCache {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        capacity: usize,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> AppResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| AppError::Config("cache_capacity must be greater than zero".to_string()))?;

        Ok(Self {
            provider,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            policy,
            timeout,
            counters: Counters::default(),
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Cache key for a piece of text under the current model.
    pub fn key_for(&self, text: &str) -> String {
        cache_key(self.provider.model_name(), &normalize_text(text))
    }

    /// Return the cached vector for `text`, computing it at most once.
    pub async fn get_or_compute(&self, text: &str) -> AppResult<Vector> {
        let normalized = normalize_text(text);
        let key = cache_key(self.provider.model_name(), &normalized);

        if let Some(hit) = lock(&self.entries).get(&key).cloned() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let flight = {
            let mut in_flight = lock(&self.in_flight);
            // A flight may have finished between the fast path and here.
            if let Some(hit) = lock(&self.entries).get(&key).cloned() {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            match in_flight.get(&key) {
                Some(existing) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    Arc::clone(existing)
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let flight: Flight = Arc::new(OnceCell::new());
                    in_flight.insert(key.clone(), Arc::clone(&flight));
                    flight
                }
            }
        };

        let outcome = flight
            .get_or_try_init(|| self.compute(&normalized))
            .await
            .cloned();

        let mut in_flight = lock(&self.in_flight);
        let owns_slot = in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &flight));

        match outcome {
            Ok(vector) => {
                if owns_slot {
                    in_flight.remove(&key);
                    let mut entries = lock(&self.entries);
                    if let Some((evicted, _)) = entries.push(key.clone(), Arc::clone(&vector)) {
                        if evicted != key {
                            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Ok(vector)
            }
            Err(err) => {
                // Later callers start a fresh flight instead of joining a failed one.
                if owns_slot {
                    in_flight.remove(&key);
                }
                Err(err)
            }
        }
    }

    async fn compute(&self, normalized: &str) -> AppResult<Vector> {
        self.counters.computations.fetch_add(1, Ordering::Relaxed);

        let vector = retry_with_timeout(&self.policy, self.timeout, "embed", || {
            self.provider.embed(normalized)
        })
        .await?;

        Ok(Vector::from(vector))
    }

    /// Seed the cache with a known vector (used when restoring a snapshot).
    pub fn insert(&self, text: &str, vector: Vector) {
        let key = self.key_for(text);
        let mut entries = lock(&self.entries);
        if let Some((evicted, _)) = entries.push(key.clone(), vector) {
            if evicted != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn contains(&self, text: &str) -> bool {
        lock(&self.entries).contains(&self.key_for(text))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: lock(&self.entries).len(),
            in_flight: lock(&self.in_flight).len(),
        }
    }
}

/// SHA-256 over model id and normalized text, hex encoded.
pub fn cache_key(model: &str, normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Provider that counts calls and can be slowed down or made to fail.
    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicU32,
        delay_ms: u64,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn provider_name(&self) -> &str {
            "counting"
        }

        fn model_name(&self) -> &str {
            "count-v1"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if call < self.fail_first {
                return Err(AppError::InvalidInput("scripted failure".into()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn cache_with(provider: Arc<CountingProvider>, capacity: usize) -> EmbeddingCache {
        EmbeddingCache::new(provider, capacity, RetryPolicy::none(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), 8);

        let a = cache.get_or_compute("same text").await.unwrap();
        let b = cache.get_or_compute("same text").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_key_uses_normalized_text() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), 8);

        cache.get_or_compute("a  b\r\n").await.unwrap();
        cache.get_or_compute("a b").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_computation() {
        let provider = Arc::new(CountingProvider {
            delay_ms: 50,
            ..CountingProvider::default()
        });
        let cache = Arc::new(cache_with(Arc::clone(&provider), 8));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get_or_compute("hot key").await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(Arc::clone(&provider), 2);

        cache.get_or_compute("one").await.unwrap();
        cache.get_or_compute("two").await.unwrap();
        cache.get_or_compute("one").await.unwrap();
        cache.get_or_compute("three").await.unwrap();

        assert!(cache.contains("one"));
        assert!(!cache.contains("two"));
        assert!(cache.contains("three"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_awaited_entry_survives_eviction_pressure() {
        let provider = Arc::new(CountingProvider {
            delay_ms: 80,
            ..CountingProvider::default()
        });
        let cache = Arc::new(cache_with(Arc::clone(&provider), 1));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_compute("awaited").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let joiner = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_compute("awaited").await })
        };
        // Churn the single LRU slot while the flight is pending.
        cache.get_or_compute("x").await.unwrap();
        cache.get_or_compute("y").await.unwrap();

        let a = slow.await.unwrap().unwrap();
        let b = joiner.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.stats().coalesced, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let provider = Arc::new(CountingProvider {
            fail_first: 1,
            ..CountingProvider::default()
        });
        let cache = cache_with(Arc::clone(&provider), 4);

        assert!(cache.get_or_compute("flaky").await.is_err());
        assert!(cache.get_or_compute("flaky").await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[test]
    fn test_cache_key_depends_on_model() {
        assert_ne!(cache_key("m1", "text"), cache_key("m2", "text"));
        assert_eq!(cache_key("m1", "text").len(), 64);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let provider = Arc::new(CountingProvider::default());
        assert!(EmbeddingCache::new(provider, 0, RetryPolicy::none(), Duration::from_secs(1)).is_err());
    }
}
